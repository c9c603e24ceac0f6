//! Asset Adapters
//!
//! One adapter per asset class wraps one upstream provider. Each adapter
//! formats symbols the way its provider expects, converts provider-native
//! bars (timestamp units, scaled prices, optional volume) into
//! [`HistoricalBar`]s, gates calls through its own rate limit and puts a
//! deadline on every upstream call.
//!
//! The set of adapters is closed: [`Adapter`] is exactly
//! `Stock | Crypto | Forex`, chosen by the symbol router's asset class.

pub mod crypto;
pub mod forex;
pub mod http;
pub mod mock;
pub mod rate_gate;
pub mod stock;
pub mod synthetic;
pub mod upstream;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use types::asset::AssetClass;
use types::bar::HistoricalBar;
use types::chart::ChartDataParams;
use types::errors::{MarketDataError, MarketDataResult};

use crate::bars::{keep_latest, normalize_series};
use crate::config::{AdapterConfig, AdaptersConfig};

pub use crypto::CryptoAdapter;
pub use forex::ForexAdapter;
pub use http::HttpUpstream;
pub use mock::MockUpstream;
pub use rate_gate::RateGate;
pub use stock::StockAdapter;
pub use synthetic::SyntheticUpstream;
pub use upstream::{RawBar, RawNumber, RawTimestamp, Upstream};

/// A rate-gate token already taken for one live poll.
///
/// Only [`Adapter::poll_permit`] hands these out, so every poll is paid for
/// before it reaches the provider.
#[must_use]
pub struct PollPermit(());

/// How a call gets past the adapter's own rate gate.
enum Admission {
    /// Fail with `RateLimited` when the gate is empty.
    FailFast,
    /// The caller already waited for its token.
    Paid(PollPermit),
}

/// Machinery shared by every adapter variant: gate, deadline, conversion.
pub struct AdapterCore {
    class: AssetClass,
    upstream: Arc<dyn Upstream>,
    config: AdapterConfig,
    gate: RateGate,
    /// Reject bars without volume instead of treating them as zero volume.
    requires_volume: bool,
}

impl AdapterCore {
    fn new(
        class: AssetClass,
        upstream: Arc<dyn Upstream>,
        config: AdapterConfig,
        requires_volume: bool,
    ) -> Self {
        let gate = RateGate::new(config.rate_limit_capacity, config.rate_limit_refill_per_sec);
        Self {
            class,
            upstream,
            config,
            gate,
            requires_volume,
        }
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn rate_limited(&self, provider_hint: Option<Duration>) -> MarketDataError {
        let delay = self.config.backoff.resolve(provider_hint);
        MarketDataError::RateLimited {
            retry_after_ms: Some(delay.as_millis() as u64),
        }
    }

    /// Run one upstream call behind the rate gate and the deadline.
    async fn guarded<T, F>(
        &self,
        operation: &'static str,
        provider_symbol: &str,
        admission: Admission,
        call: F,
    ) -> MarketDataResult<T>
    where
        F: Future<Output = MarketDataResult<T>>,
    {
        match admission {
            Admission::FailFast => {
                if let Err(wait) = self.gate.try_acquire() {
                    debug!(
                        asset_class = %self.class,
                        provider_symbol,
                        wait_ms = wait.as_millis() as u64,
                        "Rate gate exhausted"
                    );
                    return Err(self.rate_limited(Some(wait)));
                }
            }
            Admission::Paid(_permit) => {}
        }

        let deadline = self.config.request_timeout();
        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(MarketDataError::RateLimited { retry_after_ms })) => {
                warn!(
                    upstream = self.upstream.name(),
                    provider_symbol,
                    operation,
                    "Upstream rate limited"
                );
                Err(self.rate_limited(retry_after_ms.map(Duration::from_millis)))
            }
            Ok(Err(err)) => {
                if let MarketDataError::UpstreamDataInvalid { reason } = &err {
                    error!(
                        upstream = self.upstream.name(),
                        provider_symbol,
                        operation,
                        reason = reason.as_str(),
                        "Upstream returned invalid data"
                    );
                }
                Err(err)
            }
            Err(_) => {
                warn!(
                    upstream = self.upstream.name(),
                    provider_symbol,
                    operation,
                    deadline_ms = deadline.as_millis() as u64,
                    "Upstream call exceeded deadline"
                );
                Err(MarketDataError::unavailable(format!(
                    "{} {} timed out",
                    self.upstream.name(),
                    operation
                )))
            }
        }
    }

    async fn fetch_bars(
        &self,
        provider_symbol: &str,
        params: &ChartDataParams,
    ) -> MarketDataResult<Vec<HistoricalBar>> {
        let raw = self
            .guarded(
                "fetch_bars",
                provider_symbol,
                Admission::FailFast,
                self.upstream
                    .fetch_bars(provider_symbol, params.timespan, params.limit),
            )
            .await?;

        let converted = raw
            .iter()
            .map(|bar| self.convert(bar))
            .collect::<MarketDataResult<Vec<_>>>()
            .and_then(|bars| normalize_series(&params.symbol, bars));

        match converted {
            Ok(bars) => Ok(keep_latest(bars, params.limit as usize)),
            Err(err) => {
                error!(
                    upstream = self.upstream.name(),
                    symbol = params.symbol.as_str(),
                    error = %err,
                    "Discarding bar series"
                );
                Err(err)
            }
        }
    }

    async fn poll_latest(
        &self,
        provider_symbol: &str,
        permit: PollPermit,
    ) -> MarketDataResult<Option<HistoricalBar>> {
        let raw = self
            .guarded(
                "latest",
                provider_symbol,
                Admission::Paid(permit),
                self.upstream.latest(provider_symbol),
            )
            .await?;
        raw.map(|bar| self.convert(&bar)).transpose().inspect_err(|err| {
            error!(
                upstream = self.upstream.name(),
                provider_symbol,
                error = %err,
                "Discarding latest bar"
            );
        })
    }

    /// Convert one provider bar into the canonical model.
    pub fn convert(&self, raw: &RawBar) -> MarketDataResult<HistoricalBar> {
        let time = self.convert_time(&raw.t)?;
        let price = |value: &RawNumber, field: &str| -> MarketDataResult<Decimal> {
            value
                .to_decimal()
                .map(|d| self.scale_price(d))
                .ok_or_else(|| {
                    MarketDataError::invalid_data(format!("non-numeric {} in bar at {}", field, time))
                })
        };

        let volume = match &raw.v {
            Some(v) => v.to_decimal().ok_or_else(|| {
                MarketDataError::invalid_data(format!("non-numeric volume in bar at {}", time))
            })?,
            None if self.requires_volume => {
                return Err(MarketDataError::invalid_data(format!(
                    "missing volume in bar at {}",
                    time
                )))
            }
            None => Decimal::ZERO,
        };

        let bar = HistoricalBar::new(
            time,
            price(&raw.o, "open")?,
            price(&raw.h, "high")?,
            price(&raw.l, "low")?,
            price(&raw.c, "close")?,
            volume.normalize(),
        );

        if !bar.is_valid() {
            return Err(MarketDataError::invalid_data(format!(
                "bar at {} violates OHLCV invariants",
                time
            )));
        }
        Ok(bar)
    }

    fn convert_time(&self, raw: &RawTimestamp) -> MarketDataResult<i64> {
        let unit = self.config.timestamp_unit;
        match raw {
            RawTimestamp::Epoch(value) => Ok(unit.to_seconds(*value)),
            RawTimestamp::Text(text) => {
                let text = text.trim();
                if let Ok(value) = text.parse::<i64>() {
                    return Ok(unit.to_seconds(value));
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.timestamp())
                    .map_err(|e| {
                        MarketDataError::invalid_data(format!("unparseable timestamp {:?}: {}", text, e))
                    })
            }
        }
    }

    fn scale_price(&self, value: Decimal) -> Decimal {
        let mut scaled = match self.config.price_exponent {
            0 => value,
            exponent => value * Decimal::new(1, exponent),
        };
        if let Some(dp) = self.config.price_precision {
            scaled = scaled.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
        }
        scaled.normalize()
    }
}

/// Closed set of asset adapters.
pub enum Adapter {
    Stock(StockAdapter),
    Crypto(CryptoAdapter),
    Forex(ForexAdapter),
}

impl Adapter {
    /// Build the adapter variant for `class`.
    pub fn for_class(class: AssetClass, upstream: Arc<dyn Upstream>, config: AdapterConfig) -> Self {
        match class {
            AssetClass::Stock => Adapter::Stock(StockAdapter::new(upstream, config)),
            AssetClass::Crypto => Adapter::Crypto(CryptoAdapter::new(upstream, config)),
            AssetClass::Forex => Adapter::Forex(ForexAdapter::new(upstream, config)),
        }
    }

    fn core(&self) -> &AdapterCore {
        match self {
            Adapter::Stock(a) => &a.core,
            Adapter::Crypto(a) => &a.core,
            Adapter::Forex(a) => &a.core,
        }
    }

    pub fn asset_class(&self) -> AssetClass {
        self.core().class
    }

    pub fn upstream_name(&self) -> &str {
        self.core().upstream.name()
    }

    /// Canonical symbol in the provider's format.
    pub fn provider_symbol(&self, symbol: &str) -> String {
        match self {
            Adapter::Stock(a) => a.provider_symbol(symbol),
            Adapter::Crypto(a) => a.provider_symbol(symbol),
            Adapter::Forex(a) => a.provider_symbol(symbol),
        }
    }

    /// Snapshot path: normalized bars for `params.symbol`, at most `params.limit`.
    pub async fn fetch_bars(&self, params: &ChartDataParams) -> MarketDataResult<Vec<HistoricalBar>> {
        let provider_symbol = self.provider_symbol(&params.symbol);
        self.core().fetch_bars(&provider_symbol, params).await
    }

    /// Wait for a rate-gate token for one live poll.
    ///
    /// Polls queue here instead of failing, so the adapter's own limit never
    /// shows up as an upstream failure.
    pub async fn poll_permit(&self) -> PollPermit {
        self.core().gate.acquire().await;
        PollPermit(())
    }

    /// Live path: the provider's current bar for `symbol`.
    pub async fn poll_latest(
        &self,
        symbol: &str,
        permit: PollPermit,
    ) -> MarketDataResult<Option<HistoricalBar>> {
        let provider_symbol = self.provider_symbol(symbol);
        self.core().poll_latest(&provider_symbol, permit).await
    }

    /// Provider push feed for `symbol`, when available.
    pub fn live_feed(&self, symbol: &str) -> Option<broadcast::Receiver<RawBar>> {
        let provider_symbol = self.provider_symbol(symbol);
        self.core().upstream.live_feed(&provider_symbol)
    }

    /// Convert a pushed provider bar.
    pub fn normalize(&self, raw: &RawBar) -> MarketDataResult<HistoricalBar> {
        self.core().convert(raw)
    }

    /// Poll spacing the adapter's rate limit sustains.
    pub fn min_poll_interval(&self) -> Duration {
        self.core().gate.sustained_interval()
    }

    pub fn config(&self) -> &AdapterConfig {
        self.core().config()
    }
}

/// Upstream providers, one per asset class.
#[derive(Clone)]
pub struct Upstreams {
    pub stock: Arc<dyn Upstream>,
    pub crypto: Arc<dyn Upstream>,
    pub forex: Arc<dyn Upstream>,
}

/// The three adapters, selected by asset class.
pub struct AdapterSet {
    stock: Adapter,
    crypto: Adapter,
    forex: Adapter,
}

impl AdapterSet {
    pub fn new(upstreams: Upstreams, config: &AdaptersConfig) -> Self {
        Self {
            stock: Adapter::for_class(AssetClass::Stock, upstreams.stock, config.stock.clone()),
            crypto: Adapter::for_class(AssetClass::Crypto, upstreams.crypto, config.crypto.clone()),
            forex: Adapter::for_class(AssetClass::Forex, upstreams.forex, config.forex.clone()),
        }
    }

    pub fn for_class(&self, class: AssetClass) -> &Adapter {
        match class {
            AssetClass::Stock => &self.stock,
            AssetClass::Crypto => &self.crypto,
            AssetClass::Forex => &self.forex,
        }
    }
}
