//! Symbol Router
//!
//! Classifies an incoming client symbol into an asset class and its
//! canonical spelling. Classification is a pure lookup: configured
//! overrides first, then the crypto, forex and equity naming conventions.
//!
//! Accepted spellings:
//! - `BTCUSD`, `btc-usd`, `BTC/USD`, `X:BTCUSD` → crypto `BTCUSD`
//! - `EURUSD`, `EUR/USD`, `C:EURUSD` → forex `EURUSD`
//! - `AAPL`, `brk.b` → stock `AAPL`, `BRK.B`

use std::collections::HashMap;

use types::asset::AssetClass;
use types::errors::{MarketDataError, MarketDataResult};

use crate::config::RouterConfig;

/// Crypto base assets the crypto adapter's provider lists.
const CRYPTO_BASES: &[&str] = &[
    "BTC", "ETH", "SOL", "XRP", "ADA", "DOGE", "DOT", "LTC", "AVAX", "LINK", "MATIC", "BCH",
    "XLM", "UNI", "ATOM", "ETC", "SHIB", "TRX", "NEAR", "APT", "ARB", "OP", "PEPE",
];

/// Quote legs for crypto pairs. Longest first so `USDT` wins over `USD`.
const CRYPTO_QUOTES: &[&str] = &["USDT", "USDC", "USD", "EUR", "BTC"];

/// ISO 4217 codes the forex adapter's provider quotes.
const FIAT_CURRENCIES: &[&str] = &[
    "USD", "EUR", "JPY", "GBP", "CHF", "AUD", "CAD", "NZD", "SEK", "NOK", "DKK", "HKD", "SGD",
    "CNH", "MXN", "ZAR", "TRY", "PLN",
];

const PAIR_SEPARATORS: &[char] = &['/', '-', '_'];

/// A symbol after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// Canonical spelling used for cache keys, subscriptions and responses.
    pub canonical: String,
    pub asset_class: AssetClass,
    /// Human-readable pair name (`BTC/USD`); `None` for equities.
    pub display_name: Option<String>,
}

/// Maps client symbols to asset classes.
#[derive(Debug, Clone, Default)]
pub struct SymbolRouter {
    overrides: HashMap<String, AssetClass>,
}

impl SymbolRouter {
    pub fn new(config: &RouterConfig) -> Self {
        let overrides = config
            .known_symbols
            .iter()
            .map(|(symbol, class)| (compact(&symbol.trim().to_ascii_uppercase()), *class))
            .collect();
        Self { overrides }
    }

    /// Asset class of `symbol`, or `UnknownSymbol`.
    pub fn classify(&self, symbol: &str) -> MarketDataResult<AssetClass> {
        self.resolve(symbol).map(|resolved| resolved.asset_class)
    }

    /// Classify and canonicalize `symbol`.
    pub fn resolve(&self, symbol: &str) -> MarketDataResult<ResolvedSymbol> {
        let upper = symbol.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return Err(MarketDataError::unknown_symbol(symbol));
        }

        if let Some(rest) = upper.strip_prefix("X:") {
            return resolve_crypto(&compact(rest))
                .ok_or_else(|| MarketDataError::unknown_symbol(symbol));
        }
        if let Some(rest) = upper.strip_prefix("C:") {
            return resolve_forex(&compact(rest))
                .ok_or_else(|| MarketDataError::unknown_symbol(symbol));
        }

        let compacted = compact(&upper);
        if let Some(class) = self.overrides.get(&compacted) {
            return Ok(resolve_as(&compacted, *class));
        }

        if let Some(resolved) = resolve_crypto(&compacted).or_else(|| resolve_forex(&compacted)) {
            return Ok(resolved);
        }

        // Pair separators never appear in equity tickers
        if upper.contains(PAIR_SEPARATORS) {
            return Err(MarketDataError::unknown_symbol(symbol));
        }

        resolve_stock(&upper).ok_or_else(|| MarketDataError::unknown_symbol(symbol))
    }
}

fn compact(symbol: &str) -> String {
    symbol.chars().filter(|c| !PAIR_SEPARATORS.contains(c)).collect()
}

fn resolve_as(symbol: &str, class: AssetClass) -> ResolvedSymbol {
    let display_name = match class {
        AssetClass::Crypto => split_crypto(symbol).map(|(b, q)| format!("{}/{}", b, q)),
        AssetClass::Forex => split_forex(symbol).map(|(b, q)| format!("{}/{}", b, q)),
        AssetClass::Stock => None,
    };
    ResolvedSymbol {
        canonical: symbol.to_string(),
        asset_class: class,
        display_name,
    }
}

fn split_crypto(symbol: &str) -> Option<(&str, &str)> {
    CRYPTO_QUOTES.iter().find_map(|quote| {
        let base = symbol.strip_suffix(quote)?;
        CRYPTO_BASES.contains(&base).then_some((base, *quote))
    })
}

fn split_forex(symbol: &str) -> Option<(&str, &str)> {
    if symbol.len() != 6 || !symbol.is_ascii() {
        return None;
    }
    let (base, quote) = symbol.split_at(3);
    (base != quote && FIAT_CURRENCIES.contains(&base) && FIAT_CURRENCIES.contains(&quote))
        .then_some((base, quote))
}

fn resolve_crypto(symbol: &str) -> Option<ResolvedSymbol> {
    split_crypto(symbol).map(|_| resolve_as(symbol, AssetClass::Crypto))
}

fn resolve_forex(symbol: &str) -> Option<ResolvedSymbol> {
    split_forex(symbol).map(|_| resolve_as(symbol, AssetClass::Forex))
}

/// 1-5 letter ticker with an optional 1-2 letter share-class suffix.
fn resolve_stock(symbol: &str) -> Option<ResolvedSymbol> {
    let (ticker, class_suffix) = match symbol.split_once('.') {
        Some((ticker, suffix)) => (ticker, Some(suffix)),
        None => (symbol, None),
    };

    let ticker_ok =
        (1..=5).contains(&ticker.len()) && ticker.chars().all(|c| c.is_ascii_alphabetic());
    let suffix_ok = class_suffix.map_or(true, |s| {
        (1..=2).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphabetic())
    });

    (ticker_ok && suffix_ok).then(|| resolve_as(symbol, AssetClass::Stock))
}
