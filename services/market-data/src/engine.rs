//! Engine wiring
//!
//! Builds the shared router, adapters, registry, chart service and
//! dispatcher from one [`MarketDataConfig`] and a set of upstreams.

use std::sync::Arc;

use tracing::info;

use crate::adapters::{AdapterSet, Upstreams};
use crate::chart::ChartService;
use crate::config::{ConfigError, MarketDataConfig};
use crate::dispatcher::UpdateDispatcher;
use crate::metrics::ServiceMetrics;
use crate::registry::SubscriptionRegistry;
use crate::router::SymbolRouter;
use crate::session::ConnectionSession;

pub struct MarketDataEngine {
    config: MarketDataConfig,
    router: Arc<SymbolRouter>,
    charts: Arc<ChartService>,
    dispatcher: Arc<UpdateDispatcher>,
    metrics: Arc<ServiceMetrics>,
}

impl MarketDataEngine {
    /// Build the engine. Rejects a configuration that fails
    /// [`MarketDataConfig::validate`].
    pub fn new(config: MarketDataConfig, upstreams: Upstreams) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = Arc::new(ServiceMetrics::new());
        let router = Arc::new(SymbolRouter::new(&config.router));
        let adapters = Arc::new(AdapterSet::new(upstreams, &config.adapters));
        let registry = Arc::new(SubscriptionRegistry::new(config.session.max_subscriptions));

        let charts = Arc::new(ChartService::new(
            router.clone(),
            adapters.clone(),
            &config.cache,
            config.chart.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(UpdateDispatcher::new(
            router.clone(),
            adapters,
            registry,
            config.dispatcher.clone(),
            metrics.clone(),
        ));

        info!(
            cache_ttl_ms = config.cache.ttl_ms,
            poll_interval_ms = config.dispatcher.poll_interval_ms,
            "Market data engine initialized"
        );

        Ok(Self {
            config,
            router,
            charts,
            dispatcher,
            metrics,
        })
    }

    pub fn config(&self) -> &MarketDataConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<SymbolRouter> {
        &self.router
    }

    pub fn charts(&self) -> &Arc<ChartService> {
        &self.charts
    }

    pub fn dispatcher(&self) -> &Arc<UpdateDispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Open a live session for a newly accepted transport.
    pub fn open_session(&self) -> ConnectionSession {
        ConnectionSession::open(self.dispatcher.clone(), &self.config.session)
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockUpstream;

    fn upstreams() -> Upstreams {
        Upstreams {
            stock: Arc::new(MockUpstream::new("stocks")),
            crypto: Arc::new(MockUpstream::new("crypto")),
            forex: Arc::new(MockUpstream::new("forex")),
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = MarketDataConfig::default();
        config.adapters.crypto.rate_limit_refill_per_sec = 0.0;
        assert!(matches!(
            MarketDataEngine::new(config, upstreams()),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = MarketDataConfig::default();
        config.session.outbound_capacity = 0;
        assert!(MarketDataEngine::new(config, upstreams()).is_err());
    }

    #[test]
    fn test_builds_with_defaults() {
        let engine = MarketDataEngine::new(MarketDataConfig::default(), upstreams()).unwrap();
        assert_eq!(engine.config(), &MarketDataConfig::default());
        assert!(engine.dispatcher().active_symbols().is_empty());
    }
}
