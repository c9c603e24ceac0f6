//! Canonical OHLCV bar model
//!
//! Every adapter converts its provider's native bar format into
//! [`HistoricalBar`]: time in whole seconds since the Unix epoch and all
//! prices and volumes as `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV sample for a fixed time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalBar {
    /// Bucket start, seconds since epoch.
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl HistoricalBar {
    pub fn new(
        time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar whose four prices are equal, as produced by a single print.
    pub fn flat(time: i64, price: Decimal, volume: Decimal) -> Self {
        Self::new(time, price, price, price, price, volume)
    }

    /// Validate bar integrity (OHLCV invariants).
    ///
    /// `low <= open, close <= high` and a non-negative volume.
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
    }

    /// Bucket start as a UTC datetime, `None` if out of chrono's range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// A normalized bar published for one symbol on the live path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarUpdate {
    pub symbol: String,
    pub bar: HistoricalBar,
}

impl BarUpdate {
    pub fn new(symbol: impl Into<String>, bar: HistoricalBar) -> Self {
        Self {
            symbol: symbol.into(),
            bar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: i64, high: i64, low: i64, close: i64) -> HistoricalBar {
        HistoricalBar::new(
            1_700_000_000,
            Decimal::from(open),
            Decimal::from(high),
            Decimal::from(low),
            Decimal::from(close),
            Decimal::from(10),
        )
    }

    #[test]
    fn test_valid_bar() {
        assert!(bar(100, 110, 95, 105).is_valid());
        assert!(HistoricalBar::flat(0, Decimal::from(5), Decimal::ZERO).is_valid());
    }

    #[test]
    fn test_invalid_bars() {
        // High < Open
        assert!(!bar(100, 99, 95, 98).is_valid());
        // Low > Close
        assert!(!bar(100, 110, 101, 100).is_valid());

        let mut negative_volume = bar(100, 110, 95, 105);
        negative_volume.volume = Decimal::from(-1);
        assert!(!negative_volume.is_valid());
    }

    #[test]
    fn test_datetime() {
        let b = bar(1, 1, 1, 1);
        let dt = b.datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_bar_serialization() {
        let b = bar(100, 110, 95, 105);
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"time\":1700000000"));

        let deserialized: HistoricalBar = serde_json::from_str(&json).unwrap();
        assert_eq!(b, deserialized);
    }
}
