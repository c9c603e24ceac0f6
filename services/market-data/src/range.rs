//! Range Translator
//!
//! Maps a client range token to the provider query for it. The table is
//! fixed so every token always yields the same timespan and bar count.

use types::chart::{ChartDataParams, Timespan};
use types::errors::{MarketDataError, MarketDataResult};

/// Token used when a snapshot query names no range.
pub const DEFAULT_RANGE: &str = "1D";

/// token → (timespan, bar count)
///
/// `1D`/`1W`/`1M` select the chart granularity for equities and crypto;
/// `D`/`W` are the interval selectors currency-pair charts use.
const RANGE_TABLE: &[(&str, Timespan, u32)] = &[
    ("1D", Timespan::Day, 90),
    ("1W", Timespan::Week, 52),
    ("1M", Timespan::Month, 24),
    ("D", Timespan::Day, 60),
    ("W", Timespan::Week, 26),
];

/// Translate a range token (case-insensitive) into provider parameters.
///
/// The returned params have an empty symbol; see [`ChartDataParams::for_symbol`].
pub fn translate(token: &str) -> MarketDataResult<ChartDataParams> {
    let normalized = token.trim().to_ascii_uppercase();
    RANGE_TABLE
        .iter()
        .find(|(t, _, _)| *t == normalized)
        .map(|(_, timespan, limit)| ChartDataParams::new(*timespan, *limit))
        .ok_or_else(|| MarketDataError::invalid_range(token))
}

/// All accepted tokens, in table order.
pub fn supported_tokens() -> impl Iterator<Item = &'static str> {
    RANGE_TABLE.iter().map(|(token, _, _)| *token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equity_tokens() {
        let day = translate("1D").unwrap();
        assert_eq!((day.timespan, day.limit), (Timespan::Day, 90));

        let week = translate("1W").unwrap();
        assert_eq!((week.timespan, week.limit), (Timespan::Week, 52));

        let month = translate("1M").unwrap();
        assert_eq!((month.timespan, month.limit), (Timespan::Month, 24));
    }

    #[test]
    fn test_forex_interval_tokens() {
        assert_eq!(translate("D").unwrap().timespan, Timespan::Day);
        assert_eq!(translate("w").unwrap().timespan, Timespan::Week);
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(translate(" 1w ").unwrap(), translate("1W").unwrap());
    }

    #[test]
    fn test_unknown_token() {
        let err = translate("5Y").unwrap_err();
        assert_eq!(err, MarketDataError::invalid_range("5Y"));
        assert!(translate("").is_err());
    }

    #[test]
    fn test_symbol_left_for_caller() {
        let params = translate(DEFAULT_RANGE).unwrap();
        assert!(params.symbol.is_empty());
        assert!(params.limit > 0);
    }

    #[test]
    fn test_every_supported_token_translates() {
        for token in supported_tokens() {
            assert!(translate(token).is_ok(), "{}", token);
        }
        assert_eq!(supported_tokens().count(), 5);
    }
}
