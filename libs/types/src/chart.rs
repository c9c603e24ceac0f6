//! Snapshot query types
//!
//! [`ChartDataParams`] is the provider-facing form of a client range token;
//! [`ChartDataResponse`] is what a snapshot query returns.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::asset::AssetClass;
use crate::bar::HistoricalBar;

/// Bar granularity requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timespan {
    Day,
    Week,
    Month,
}

impl Timespan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timespan::Day => "day",
            Timespan::Week => "week",
            Timespan::Month => "month",
        }
    }

    /// Nominal bucket length in seconds (30 days for a month).
    pub fn duration_secs(&self) -> i64 {
        match self {
            Timespan::Day => 86_400,
            Timespan::Week => 7 * 86_400,
            Timespan::Month => 30 * 86_400,
        }
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider query derived from a range token.
///
/// Built by the range translator with an empty symbol; the caller fills
/// the symbol in with [`ChartDataParams::for_symbol`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartDataParams {
    pub symbol: String,
    pub timespan: Timespan,
    pub limit: u32,
}

impl ChartDataParams {
    pub fn new(timespan: Timespan, limit: u32) -> Self {
        Self {
            symbol: String::new(),
            timespan,
            limit,
        }
    }

    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }
}

/// Snapshot answer for one (symbol, range) query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataResponse {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub bars: Vec<HistoricalBar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_params_for_symbol() {
        let params = ChartDataParams::new(Timespan::Week, 52);
        assert!(params.symbol.is_empty());

        let params = params.for_symbol("AAPL");
        assert_eq!(params.symbol, "AAPL");
        assert_eq!(params.timespan, Timespan::Week);
        assert_eq!(params.limit, 52);
    }

    #[test]
    fn test_response_json_shape() {
        let response = ChartDataResponse {
            symbol: "BTCUSD".to_string(),
            asset_class: AssetClass::Crypto,
            bars: vec![HistoricalBar::flat(60, Decimal::from(50000), Decimal::ONE)],
            display_name: Some("BTC/USD".to_string()),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["assetClass"], "crypto");
        assert_eq!(json["displayName"], "BTC/USD");
        assert_eq!(json["bars"][0]["time"], 60);
    }

    #[test]
    fn test_response_without_display_name() {
        let response = ChartDataResponse {
            symbol: "AAPL".to_string(),
            asset_class: AssetClass::Stock,
            bars: Vec::new(),
            display_name: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("displayName"));
    }
}
