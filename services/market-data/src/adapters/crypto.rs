//! Crypto pair adapter.

use std::sync::Arc;

use types::asset::AssetClass;

use super::{AdapterCore, Upstream};
use crate::config::AdapterConfig;

/// Crypto pairs: provider prefix plus the separator-free pair (`X:BTCUSD`).
pub struct CryptoAdapter {
    pub(super) core: AdapterCore,
}

impl CryptoAdapter {
    pub fn new(upstream: Arc<dyn Upstream>, config: AdapterConfig) -> Self {
        Self {
            core: AdapterCore::new(AssetClass::Crypto, upstream, config, true),
        }
    }

    pub fn provider_symbol(&self, symbol: &str) -> String {
        let pair: String = symbol
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        format!("{}{}", self.core.config().provider_prefix, pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockUpstream;
    use crate::adapters::{RawBar, RawNumber};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn adapter() -> CryptoAdapter {
        CryptoAdapter::new(Arc::new(MockUpstream::new("crypto")), AdapterConfig::crypto())
    }

    #[test]
    fn test_provider_symbol() {
        let a = adapter();
        assert_eq!(a.provider_symbol("BTCUSD"), "X:BTCUSD");
        assert_eq!(a.provider_symbol("eth-usdt"), "X:ETHUSDT");
    }

    #[test]
    fn test_eight_decimal_precision() {
        let mut raw = RawBar::new(
            1_700_000_000_000,
            Decimal::ONE,
            Decimal::ONE,
            Decimal::ONE,
            Decimal::ONE,
            Some(Decimal::from(3)),
        );
        raw.c = RawNumber::Text("1.000000004".to_string());
        raw.h = RawNumber::Text("1.000000005".to_string());

        let bar = adapter().core.convert(&raw).unwrap();
        assert_eq!(bar.close, Decimal::ONE);
        assert_eq!(bar.high, Decimal::from_str("1.00000001").unwrap());
        assert_eq!(bar.time, 1_700_000_000);
    }
}
