//! Chart Service
//!
//! Snapshot path: resolve the symbol's asset class, translate the range,
//! serve from the cache or make one coalesced upstream fetch. Transient
//! upstream failures are retried a fixed number of times inside the shared
//! fetch, so coalesced callers never multiply the retries.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};
use types::chart::{ChartDataParams, ChartDataResponse};
use types::errors::MarketDataResult;

use crate::adapters::{Adapter, AdapterSet};
use crate::cache::{CacheKey, CacheOutcome, ChartCache, SharedResponse};
use crate::config::{CacheConfig, ChartConfig};
use crate::metrics::ServiceMetrics;
use crate::range;
use crate::router::{ResolvedSymbol, SymbolRouter};

pub struct ChartService {
    router: Arc<SymbolRouter>,
    adapters: Arc<AdapterSet>,
    cache: ChartCache,
    config: ChartConfig,
    metrics: Arc<ServiceMetrics>,
}

impl ChartService {
    pub fn new(
        router: Arc<SymbolRouter>,
        adapters: Arc<AdapterSet>,
        cache_config: &CacheConfig,
        config: ChartConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            router,
            adapters,
            cache: ChartCache::new(cache_config),
            config,
            metrics,
        }
    }

    /// Historical bars for `symbol` over the range named by `range_token`.
    pub async fn get_chart(&self, symbol: &str, range_token: &str) -> MarketDataResult<SharedResponse> {
        let started = Instant::now();
        let resolved = self.router.resolve(symbol)?;
        let params = range::translate(range_token)?.for_symbol(resolved.canonical.as_str());
        let key = CacheKey::new(resolved.asset_class, &params);
        let adapter = self.adapters.for_class(resolved.asset_class);

        let (result, outcome) = self
            .cache
            .get_or_fetch(&key, || self.fetch_with_retry(adapter, &resolved, &params))
            .await;

        match outcome {
            CacheOutcome::Hit => self.metrics.record_cache_hit(),
            CacheOutcome::Fetched => self.metrics.record_cache_miss(),
            CacheOutcome::Coalesced => {
                self.metrics.record_cache_miss();
                self.metrics.record_coalesced_wait();
            }
        }
        self.metrics
            .record_chart_latency(started.elapsed().as_micros() as u64);
        result
    }

    pub fn cache(&self) -> &ChartCache {
        &self.cache
    }

    async fn fetch_with_retry(
        &self,
        adapter: &Adapter,
        resolved: &ResolvedSymbol,
        params: &ChartDataParams,
    ) -> MarketDataResult<SharedResponse> {
        let mut attempt = 0;
        loop {
            self.metrics.record_upstream_fetch();
            match adapter.fetch_bars(params).await {
                Ok(bars) => {
                    info!(
                        symbol = params.symbol.as_str(),
                        asset_class = %resolved.asset_class,
                        timespan = %params.timespan,
                        bars = bars.len(),
                        "Fetched chart"
                    );
                    return Ok(Arc::new(ChartDataResponse {
                        symbol: resolved.canonical.clone(),
                        asset_class: resolved.asset_class,
                        bars,
                        display_name: resolved.display_name.clone(),
                    }));
                }
                Err(err) if err.is_retryable() && attempt < self.config.snapshot_retries => {
                    let delay = err.retry_after().unwrap_or_else(|| self.config.retry_delay());
                    if delay > self.config.max_retry_wait() {
                        // Too long to hold the request open
                        warn!(
                            symbol = params.symbol.as_str(),
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retry wait too long, giving up"
                        );
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        symbol = params.symbol.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying chart fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockUpstream, RawBar, Upstreams};
    use crate::config::{AdaptersConfig, RouterConfig};
    use rust_decimal::Decimal;
    use types::asset::AssetClass;
    use types::errors::MarketDataError;

    struct Fixture {
        service: ChartService,
        stocks: Arc<MockUpstream>,
        crypto: Arc<MockUpstream>,
        metrics: Arc<ServiceMetrics>,
    }

    fn fixture(config: ChartConfig) -> Fixture {
        let stocks = Arc::new(MockUpstream::new("stocks"));
        let crypto = Arc::new(MockUpstream::new("crypto"));
        let upstreams = Upstreams {
            stock: stocks.clone(),
            crypto: crypto.clone(),
            forex: Arc::new(MockUpstream::new("forex")),
        };
        let metrics = Arc::new(ServiceMetrics::new());
        let service = ChartService::new(
            Arc::new(SymbolRouter::new(&RouterConfig::default())),
            Arc::new(AdapterSet::new(upstreams, &AdaptersConfig::default())),
            &CacheConfig::default(),
            config,
            metrics.clone(),
        );
        Fixture {
            service,
            stocks,
            crypto,
            metrics,
        }
    }

    fn bar(day: i64, close: i64) -> RawBar {
        let c = Decimal::from(close);
        RawBar::new(day * 86_400_000, c, c + Decimal::ONE, c - Decimal::ONE, c, Some(Decimal::from(100)))
    }

    #[tokio::test]
    async fn test_display_name_for_pairs() {
        let f = fixture(ChartConfig::default());
        f.crypto.set_bars(vec![bar(1, 50_000)]);

        let chart = f.service.get_chart("btc-usd", "1W").await.unwrap();
        assert_eq!(chart.symbol, "BTCUSD");
        assert_eq!(chart.asset_class, AssetClass::Crypto);
        assert_eq!(chart.display_name.as_deref(), Some("BTC/USD"));
        assert_eq!(f.crypto.last_fetch_symbol().as_deref(), Some("X:BTCUSD"));
    }

    #[tokio::test]
    async fn test_invalid_range_never_reaches_upstream() {
        let f = fixture(ChartConfig::default());
        let err = f.service.get_chart("AAPL", "5Y").await.unwrap_err();
        assert_eq!(err, MarketDataError::invalid_range("5Y"));
        assert_eq!(f.stocks.fetch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let f = fixture(ChartConfig {
            snapshot_retries: 1,
            retry_delay_ms: 10,
            ..ChartConfig::default()
        });
        f.stocks.push_fetch_result(Err(MarketDataError::unavailable("502")));
        f.stocks.push_fetch_result(Err(MarketDataError::unavailable("502")));
        f.stocks.set_bars(vec![bar(1, 10)]);

        let err = f.service.get_chart("AAPL", "1D").await.unwrap_err();
        assert!(matches!(err, MarketDataError::UpstreamUnavailable { .. }));
        assert_eq!(f.stocks.fetch_calls(), 2);

        // Errors are not cached: the next call goes upstream and succeeds
        let chart = f.service.get_chart("AAPL", "1D").await.unwrap();
        assert_eq!(chart.bars.len(), 1);
        assert_eq!(f.stocks.fetch_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_retry_after_surfaces_immediately() {
        let f = fixture(ChartConfig {
            max_retry_wait_ms: 5_000,
            ..ChartConfig::default()
        });
        f.stocks.push_fetch_result(Err(MarketDataError::RateLimited {
            retry_after_ms: Some(3_600_000),
        }));
        f.stocks.set_bars(vec![bar(1, 10)]);

        let started = Instant::now();
        let err = f.service.get_chart("AAPL", "1D").await.unwrap_err();

        assert_eq!(
            err.retry_after(),
            Some(std::time::Duration::from_secs(3_600))
        );
        assert_eq!(f.stocks.fetch_calls(), 1);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_retry_after_is_waited_out() {
        let f = fixture(ChartConfig::default());
        f.stocks.push_fetch_result(Err(MarketDataError::RateLimited {
            retry_after_ms: Some(2_000),
        }));
        f.stocks.set_bars(vec![bar(1, 10)]);

        let chart = f.service.get_chart("AAPL", "1D").await.unwrap();
        assert_eq!(chart.bars.len(), 1);
        assert_eq!(f.stocks.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_data_not_retried() {
        let f = fixture(ChartConfig::default());
        f.stocks.push_fetch_result(Err(MarketDataError::invalid_data("garbage")));

        let err = f.service.get_chart("AAPL", "1D").await.unwrap_err();
        assert!(matches!(err, MarketDataError::UpstreamDataInvalid { .. }));
        assert_eq!(f.stocks.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_hits_and_misses() {
        let f = fixture(ChartConfig::default());
        f.stocks.set_bars(vec![bar(1, 10), bar(2, 11)]);

        f.service.get_chart("AAPL", "1D").await.unwrap();
        f.service.get_chart("aapl", "1d").await.unwrap();

        let s = f.metrics.snapshot();
        assert_eq!(s.cache_misses, 1);
        assert_eq!(s.cache_hits, 1);
        assert_eq!(s.upstream_fetches, 1);
        assert_eq!(f.service.cache().len(), 1);
    }
}
