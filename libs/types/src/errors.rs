//! Error types for the price feed
//!
//! One taxonomy is shared by the snapshot path and the live path so that
//! the same failure is classified the same way wherever it surfaces.
//! Errors are `Clone` because coalesced waiters all receive the error of
//! the single upstream call they shared.

use std::time::Duration;

use thiserror::Error;

/// How callers must treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad symbol or range from the client. Never retried.
    ClientInput,
    /// Upstream busy or unreachable. Retried with backoff.
    Transient,
    /// Upstream answered with data we cannot use. Never retried.
    Permanent,
}

/// Top-level market data error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("Unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("Invalid range: {token}")]
    InvalidRange { token: String },

    #[error("Rate limited by upstream provider")]
    RateLimited {
        /// Provider-supplied or configured backoff, when known.
        retry_after_ms: Option<u64>,
    },

    #[error("Upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("Upstream returned invalid data: {reason}")]
    UpstreamDataInvalid { reason: String },
}

impl MarketDataError {
    pub fn unknown_symbol(symbol: impl Into<String>) -> Self {
        MarketDataError::UnknownSymbol {
            symbol: symbol.into(),
        }
    }

    pub fn invalid_range(token: impl Into<String>) -> Self {
        MarketDataError::InvalidRange {
            token: token.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        MarketDataError::UpstreamUnavailable {
            reason: reason.into(),
        }
    }

    pub fn invalid_data(reason: impl Into<String>) -> Self {
        MarketDataError::UpstreamDataInvalid {
            reason: reason.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            MarketDataError::UnknownSymbol { .. } | MarketDataError::InvalidRange { .. } => {
                ErrorClass::ClientInput
            }
            MarketDataError::RateLimited { .. } | MarketDataError::UpstreamUnavailable { .. } => {
                ErrorClass::Transient
            }
            MarketDataError::UpstreamDataInvalid { .. } => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Backoff requested by the provider, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MarketDataError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Stable machine-readable code for logs and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MarketDataError::UnknownSymbol { .. } => "UNKNOWN_SYMBOL",
            MarketDataError::InvalidRange { .. } => "INVALID_RANGE",
            MarketDataError::RateLimited { .. } => "RATE_LIMITED",
            MarketDataError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            MarketDataError::UpstreamDataInvalid { .. } => "UPSTREAM_DATA_INVALID",
        }
    }
}

pub type MarketDataResult<T> = Result<T, MarketDataError>;
