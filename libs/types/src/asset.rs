//! Asset classes served by the feed
//!
//! The asset class decides which upstream adapter answers a query for a
//! symbol. It is part of every chart response and every cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Crypto asset pairs, e.g. `BTCUSD`
    Crypto,
    /// Listed equities, e.g. `AAPL`
    Stock,
    /// Currency pairs, e.g. `EURUSD`
    Forex,
}

impl AssetClass {
    /// All asset classes, in a stable order.
    pub fn all() -> &'static [AssetClass] {
        &[AssetClass::Crypto, AssetClass::Stock, AssetClass::Forex]
    }

    /// Lowercase label, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "crypto",
            AssetClass::Stock => "stock",
            AssetClass::Forex => "forex",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crypto" => Ok(AssetClass::Crypto),
            "stock" | "equity" => Ok(AssetClass::Stock),
            "forex" | "fx" => Ok(AssetClass::Forex),
            other => Err(format!("unknown asset class: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_class_serialization() {
        assert_eq!(serde_json::to_string(&AssetClass::Stock).unwrap(), "\"stock\"");
        assert_eq!(serde_json::to_string(&AssetClass::Crypto).unwrap(), "\"crypto\"");

        let parsed: AssetClass = serde_json::from_str("\"forex\"").unwrap();
        assert_eq!(parsed, AssetClass::Forex);
    }

    #[test]
    fn test_asset_class_from_str_aliases() {
        assert_eq!("Equity".parse::<AssetClass>().unwrap(), AssetClass::Stock);
        assert_eq!(" fx ".parse::<AssetClass>().unwrap(), AssetClass::Forex);
        assert!("bond".parse::<AssetClass>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for class in AssetClass::all() {
            let json = serde_json::to_string(class).unwrap();
            assert_eq!(json, format!("\"{}\"", class));
        }
    }
}
