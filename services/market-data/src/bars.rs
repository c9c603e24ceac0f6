//! Bar normalization
//!
//! Turns whatever order and duplication a provider returns into a clean
//! series: sorted by time, one bar per time, every bar satisfying the OHLCV
//! invariants. A single bad bar rejects the whole response rather than
//! letting a partial series through.

use std::collections::BTreeMap;

use tracing::debug;
use types::bar::HistoricalBar;
use types::errors::{MarketDataError, MarketDataResult};

/// Sort, de-duplicate (last occurrence wins) and validate a bar series.
pub fn normalize_series(
    symbol: &str,
    bars: Vec<HistoricalBar>,
) -> MarketDataResult<Vec<HistoricalBar>> {
    let received = bars.len();
    // BTreeMap keyed by time gives ordering and de-duplication in one pass
    let mut by_time: BTreeMap<i64, HistoricalBar> = BTreeMap::new();

    for bar in bars {
        if !bar.is_valid() {
            return Err(MarketDataError::invalid_data(format!(
                "{}: bar at {} violates OHLCV invariants",
                symbol, bar.time
            )));
        }
        by_time.insert(bar.time, bar);
    }

    if by_time.len() < received {
        debug!(
            symbol,
            received,
            kept = by_time.len(),
            "Collapsed duplicate bar times"
        );
    }

    Ok(by_time.into_values().collect())
}

/// Keep only the most recent `limit` bars of an ascending series.
pub fn keep_latest(mut bars: Vec<HistoricalBar>, limit: usize) -> Vec<HistoricalBar> {
    if bars.len() > limit {
        bars.drain(..bars.len() - limit);
    }
    bars
}

/// `time` strictly increasing across the series.
pub fn is_strictly_increasing(bars: &[HistoricalBar]) -> bool {
    bars.windows(2).all(|pair| pair[0].time < pair[1].time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn bar(time: i64, close: i64) -> HistoricalBar {
        HistoricalBar::flat(time, Decimal::from(close), Decimal::ONE)
    }

    #[test]
    fn test_sorts_and_dedupes() {
        let bars = vec![bar(300, 3), bar(100, 1), bar(200, 2), bar(100, 9)];
        let normalized = normalize_series("AAPL", bars).unwrap();

        let times: Vec<i64> = normalized.iter().map(|b| b.time).collect();
        assert_eq!(times, vec![100, 200, 300]);
        // Last occurrence for a duplicated time wins
        assert_eq!(normalized[0].close, Decimal::from(9));
    }

    #[test]
    fn test_rejects_invalid_bar() {
        let mut broken = bar(100, 10);
        broken.high = Decimal::from(5);
        let err = normalize_series("AAPL", vec![bar(50, 1), broken]).unwrap_err();
        assert!(matches!(err, MarketDataError::UpstreamDataInvalid { .. }));
    }

    #[test]
    fn test_empty_series() {
        assert!(normalize_series("AAPL", Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_keep_latest() {
        let bars: Vec<_> = (1..=5).map(|t| bar(t, t)).collect();
        let kept = keep_latest(bars, 2);
        assert_eq!(kept.iter().map(|b| b.time).collect::<Vec<_>>(), vec![4, 5]);

        let short: Vec<_> = (1..=2).map(|t| bar(t, t)).collect();
        assert_eq!(keep_latest(short, 10).len(), 2);
    }

    proptest! {
        #[test]
        fn prop_normalized_series_is_ordered_and_valid(
            raw in prop::collection::vec((0i64..1_000, 1i64..1_000, 0i64..50, 0i64..50), 0..60)
        ) {
            let bars: Vec<HistoricalBar> = raw
                .into_iter()
                .map(|(time, base, up, down)| {
                    let open = Decimal::from(base);
                    HistoricalBar::new(
                        time,
                        open,
                        open + Decimal::from(up),
                        open - Decimal::from(down),
                        open,
                        Decimal::from(up),
                    )
                })
                .collect();

            let normalized = normalize_series("BTCUSD", bars).unwrap();
            prop_assert!(is_strictly_increasing(&normalized));
            prop_assert!(normalized.iter().all(HistoricalBar::is_valid));
        }
    }
}
