//! Equity adapter.

use std::sync::Arc;

use types::asset::AssetClass;

use super::{AdapterCore, Upstream};
use crate::config::AdapterConfig;

/// Equities: plain tickers, share-class suffix kept (`BRK.B`).
pub struct StockAdapter {
    pub(super) core: AdapterCore,
}

impl StockAdapter {
    pub fn new(upstream: Arc<dyn Upstream>, config: AdapterConfig) -> Self {
        Self {
            core: AdapterCore::new(AssetClass::Stock, upstream, config, true),
        }
    }

    pub fn provider_symbol(&self, symbol: &str) -> String {
        format!(
            "{}{}",
            self.core.config().provider_prefix,
            symbol.trim().to_ascii_uppercase()
        )
    }
}
