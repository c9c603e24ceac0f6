use std::env;
use std::path::PathBuf;
use std::time::Duration;

use market_data::config::{ConfigError, MarketDataConfig};

/// Gateway configuration derived from environment variables.
///
/// Engine tuning (cache, polling, adapters) lives in an optional JSON file
/// named by `PRICEFEED_CONFIG`; everything here is process wiring.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// JSON file with a `MarketDataConfig`. `None` ⇒ built-in defaults.
    pub engine_config: Option<PathBuf>,

    // ── Upstream providers ─────────────────────────────────────────
    pub stock_url: String,
    pub crypto_url: String,
    pub forex_url: String,
    /// Sent as `x-api-key` to every provider. Empty ⇒ no header.
    pub api_key: Option<String>,
    pub upstream_timeout_ms: u64,

    /// Serve synthetic bars instead of calling providers.
    pub demo: bool,
}

fn env_str(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u16(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u16) -> u16 {
    lookup(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    lookup(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(default)
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: env_str(&lookup, "PRICEFEED_BIND", "0.0.0.0"),
            port: env_u16(&lookup, "PRICEFEED_PORT", 8080),
            engine_config: env_opt(&lookup, "PRICEFEED_CONFIG").map(PathBuf::from),
            stock_url: env_str(&lookup, "PRICEFEED_STOCK_URL", "http://localhost:9101/"),
            crypto_url: env_str(&lookup, "PRICEFEED_CRYPTO_URL", "http://localhost:9102/"),
            forex_url: env_str(&lookup, "PRICEFEED_FOREX_URL", "http://localhost:9103/"),
            api_key: env_opt(&lookup, "PRICEFEED_API_KEY"),
            upstream_timeout_ms: env_u64(&lookup, "PRICEFEED_UPSTREAM_TIMEOUT_MS", 5_000),
            demo: env_bool(&lookup, "PRICEFEED_DEMO", false),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Engine settings from `engine_config`, or defaults when unset.
    pub fn load_engine_config(&self) -> Result<MarketDataConfig, ConfigError> {
        match &self.engine_config {
            Some(path) => MarketDataConfig::from_json_file(path),
            None => Ok(MarketDataConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> GatewayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.engine_config.is_none());
        assert!(config.api_key.is_none());
        assert!(!config.demo);
        assert_eq!(config.load_engine_config().unwrap(), MarketDataConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PRICEFEED_PORT", " 9000 "),
            ("PRICEFEED_API_KEY", "secret"),
            ("PRICEFEED_DEMO", "yes"),
            ("PRICEFEED_CRYPTO_URL", "https://crypto.example/api/"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert!(config.demo);
        assert_eq!(config.crypto_url, "https://crypto.example/api/");
    }

    #[test]
    fn test_blank_and_invalid_values_fall_back() {
        let config = config_from(&[
            ("PRICEFEED_PORT", "not-a-port"),
            ("PRICEFEED_API_KEY", "   "),
            ("PRICEFEED_BIND", ""),
        ]);
        assert_eq!(config.port, 8080);
        assert!(config.api_key.is_none());
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn test_missing_engine_config_file_is_error() {
        let config = config_from(&[("PRICEFEED_CONFIG", "/nonexistent/pricefeed.json")]);
        assert!(matches!(
            config.load_engine_config(),
            Err(ConfigError::Io(_))
        ));
    }
}
