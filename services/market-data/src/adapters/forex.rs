//! Currency pair adapter.

use std::sync::Arc;

use types::asset::AssetClass;

use super::{AdapterCore, Upstream};
use crate::config::AdapterConfig;

/// Forex pairs (`C:EURUSD`). Quote providers often report no traded
/// volume, so a missing volume converts to zero.
pub struct ForexAdapter {
    pub(super) core: AdapterCore,
}

impl ForexAdapter {
    pub fn new(upstream: Arc<dyn Upstream>, config: AdapterConfig) -> Self {
        Self {
            core: AdapterCore::new(AssetClass::Forex, upstream, config, false),
        }
    }

    pub fn provider_symbol(&self, symbol: &str) -> String {
        let pair: String = symbol
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        format!("{}{}", self.core.config().provider_prefix, pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockUpstream;
    use crate::adapters::RawBar;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn adapter() -> ForexAdapter {
        ForexAdapter::new(Arc::new(MockUpstream::new("forex")), AdapterConfig::forex())
    }

    #[test]
    fn test_provider_symbol() {
        assert_eq!(adapter().provider_symbol("EURUSD"), "C:EURUSD");
        assert_eq!(adapter().provider_symbol("gbp/jpy"), "C:GBPJPY");
    }

    #[test]
    fn test_missing_volume_is_zero() {
        let price = Decimal::from_str("1.09521").unwrap();
        let raw = RawBar::new(1_704_153_600_000, price, price, price, price, None);

        let bar = adapter().core.convert(&raw).unwrap();
        assert_eq!(bar.volume, Decimal::ZERO);
        assert_eq!(bar.close, price);
    }
}
