//! Engine configuration
//!
//! Every component takes a plain config struct with a `Default` tuned for a
//! single gateway process. The whole tree deserializes from JSON so a
//! deployment can override any subset of fields.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use types::asset::AssetClass;

/// Largest scale `rust_decimal` represents.
const MAX_DECIMAL_SCALE: u32 = 28;

/// Errors while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub router: RouterConfig,
    pub cache: CacheConfig,
    pub chart: ChartConfig,
    pub dispatcher: DispatcherConfig,
    pub session: SessionConfig,
    pub adapters: AdaptersConfig,
}

impl MarketDataConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: MarketDataConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be > 0".into()));
        }
        if self.session.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.outbound_capacity must be > 0".into(),
            ));
        }
        if self.dispatcher.degraded_after_failures == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.degraded_after_failures must be > 0".into(),
            ));
        }
        if !(self.dispatcher.poll_budget_share > 0.0 && self.dispatcher.poll_budget_share <= 1.0) {
            return Err(ConfigError::Invalid(
                "dispatcher.poll_budget_share must be in (0, 1]".into(),
            ));
        }
        for class in AssetClass::all() {
            let adapter = self.adapters.get(*class);
            if adapter.rate_limit_capacity == 0
                || !adapter.rate_limit_refill_per_sec.is_finite()
                || adapter.rate_limit_refill_per_sec <= 0.0
            {
                return Err(ConfigError::Invalid(format!(
                    "adapters.{}: rate limit must allow at least one request",
                    class
                )));
            }
            if adapter.price_exponent > MAX_DECIMAL_SCALE
                || adapter.price_precision.is_some_and(|dp| dp > MAX_DECIMAL_SCALE)
            {
                return Err(ConfigError::Invalid(format!(
                    "adapters.{}: price scale must be <= {}",
                    class, MAX_DECIMAL_SCALE
                )));
            }
        }
        Ok(())
    }
}

/// Symbol router overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Symbols whose asset class is pinned regardless of pattern rules.
    pub known_symbols: BTreeMap<String, AssetClass>,
}

/// Snapshot cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live of a cached chart response in milliseconds.
    pub ttl_ms: u64,
    /// Entry cap; least recently used entries are evicted beyond it.
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 15_000,
            max_entries: 512,
        }
    }
}

/// Snapshot query retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Extra attempts after a transient upstream failure.
    pub snapshot_retries: u32,
    /// Delay between attempts when the error carries no retry hint.
    pub retry_delay_ms: u64,
    /// Longest wait a snapshot request sits through before retrying.
    /// Longer hints surface as `RateLimited` right away.
    pub max_retry_wait_ms: u64,
}

impl ChartConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_wait(&self) -> Duration {
        Duration::from_millis(self.max_retry_wait_ms)
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            snapshot_retries: 2,
            retry_delay_ms: 250,
            max_retry_wait_ms: 5_000,
        }
    }
}

/// Live polling schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Poll interval for an active symbol. Raised to the adapter's
    /// rate-limit interval when that is longer.
    pub poll_interval_ms: u64,
    /// First retry delay after a failed poll.
    pub initial_backoff_ms: u64,
    /// Cap for the exponential retry delay.
    pub max_backoff_ms: u64,
    /// Consecutive failures before subscribers are told the symbol is degraded.
    pub degraded_after_failures: u32,
    /// Fraction of an adapter's rate limit that live polling may use, split
    /// across that asset class's active symbols. The rest is left for
    /// snapshot queries.
    pub poll_budget_share: f64,
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Exponential backoff for the given failure count (1-based), capped.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            degraded_after_failures: 3,
            poll_budget_share: 0.8,
        }
    }
}

/// Per-connection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded outbound queue length.
    pub outbound_capacity: usize,
    /// Max symbols one connection may subscribe to.
    pub max_subscriptions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_subscriptions: 50,
        }
    }
}

/// Unit of the epoch timestamps a provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    Seconds,
    Millis,
    Nanos,
}

impl TimestampUnit {
    /// Convert a provider epoch value to whole seconds (floor).
    pub fn to_seconds(&self, value: i64) -> i64 {
        match self {
            TimestampUnit::Seconds => value,
            TimestampUnit::Millis => value.div_euclid(1_000),
            TimestampUnit::Nanos => value.div_euclid(1_000_000_000),
        }
    }
}

/// Recovery policy after the upstream (or our own gate) rate-limits a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RateLimitBackoff {
    /// Always wait this long, ignoring provider hints.
    Fixed { delay_ms: u64 },
    /// Honour the provider's `Retry-After`; fall back when absent.
    ProviderSupplied { fallback_ms: u64 },
}

impl RateLimitBackoff {
    pub fn resolve(&self, provider_hint: Option<Duration>) -> Duration {
        match self {
            RateLimitBackoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            RateLimitBackoff::ProviderSupplied { fallback_ms } => {
                provider_hint.unwrap_or_else(|| Duration::from_millis(*fallback_ms))
            }
        }
    }
}

/// Upstream adapter settings for one asset class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Prefix the provider expects in front of canonical symbols.
    pub provider_prefix: String,
    pub timestamp_unit: TimestampUnit,
    /// Provider prices are integers scaled by 10^price_exponent.
    pub price_exponent: u32,
    /// Decimal places kept after scaling; `None` keeps provider precision.
    pub price_precision: Option<u32>,
    /// Token bucket burst size.
    pub rate_limit_capacity: u32,
    /// Token bucket refill rate in requests per second.
    pub rate_limit_refill_per_sec: f64,
    /// Deadline for every upstream call.
    pub request_timeout_ms: u64,
    pub backoff: RateLimitBackoff,
}

impl AdapterConfig {
    pub fn stock() -> Self {
        Self {
            provider_prefix: String::new(),
            price_precision: Some(4),
            ..Self::default()
        }
    }

    pub fn crypto() -> Self {
        Self {
            provider_prefix: "X:".to_string(),
            price_precision: Some(8),
            ..Self::default()
        }
    }

    pub fn forex() -> Self {
        Self {
            provider_prefix: "C:".to_string(),
            price_precision: Some(5),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            provider_prefix: String::new(),
            timestamp_unit: TimestampUnit::Millis,
            price_exponent: 0,
            price_precision: None,
            rate_limit_capacity: 10,
            rate_limit_refill_per_sec: 5.0,
            request_timeout_ms: 5_000,
            backoff: RateLimitBackoff::ProviderSupplied { fallback_ms: 1_000 },
        }
    }
}

/// Fields given for one adapter in a config file. Anything absent keeps the
/// asset-class preset.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdapterOverrides {
    provider_prefix: Option<String>,
    timestamp_unit: Option<TimestampUnit>,
    price_exponent: Option<u32>,
    #[serde(deserialize_with = "present")]
    price_precision: Option<Option<u32>>,
    rate_limit_capacity: Option<u32>,
    rate_limit_refill_per_sec: Option<f64>,
    request_timeout_ms: Option<u64>,
    backoff: Option<RateLimitBackoff>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl AdapterOverrides {
    fn apply(self, mut preset: AdapterConfig) -> AdapterConfig {
        if let Some(prefix) = self.provider_prefix {
            preset.provider_prefix = prefix;
        }
        if let Some(unit) = self.timestamp_unit {
            preset.timestamp_unit = unit;
        }
        if let Some(exponent) = self.price_exponent {
            preset.price_exponent = exponent;
        }
        if let Some(precision) = self.price_precision {
            preset.price_precision = precision;
        }
        if let Some(capacity) = self.rate_limit_capacity {
            preset.rate_limit_capacity = capacity;
        }
        if let Some(refill) = self.rate_limit_refill_per_sec {
            preset.rate_limit_refill_per_sec = refill;
        }
        if let Some(timeout) = self.request_timeout_ms {
            preset.request_timeout_ms = timeout;
        }
        if let Some(backoff) = self.backoff {
            preset.backoff = backoff;
        }
        preset
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdaptersOverrides {
    stock: AdapterOverrides,
    crypto: AdapterOverrides,
    forex: AdapterOverrides,
}

impl From<AdaptersOverrides> for AdaptersConfig {
    fn from(overrides: AdaptersOverrides) -> Self {
        Self {
            stock: overrides.stock.apply(AdapterConfig::stock()),
            crypto: overrides.crypto.apply(AdapterConfig::crypto()),
            forex: overrides.forex.apply(AdapterConfig::forex()),
        }
    }
}

/// Adapter settings for all asset classes.
///
/// Each class deserializes as overrides on top of its preset, so a file that
/// only tunes a timeout keeps the class's symbol prefix and precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AdaptersOverrides")]
pub struct AdaptersConfig {
    pub stock: AdapterConfig,
    pub crypto: AdapterConfig,
    pub forex: AdapterConfig,
}

impl AdaptersConfig {
    pub fn get(&self, class: AssetClass) -> &AdapterConfig {
        match class {
            AssetClass::Stock => &self.stock,
            AssetClass::Crypto => &self.crypto,
            AssetClass::Forex => &self.forex,
        }
    }
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            stock: AdapterConfig::stock(),
            crypto: AdapterConfig::crypto(),
            forex: AdapterConfig::forex(),
        }
    }
}
