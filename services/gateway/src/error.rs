use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use types::errors::MarketDataError;

/// Central error type for the Gateway application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Provider sent data we could not use. Details stay in the logs.
    #[error("Bad gateway")]
    BadGateway,

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<MarketDataError> for AppError {
    fn from(err: MarketDataError) -> Self {
        match &err {
            MarketDataError::UnknownSymbol { .. } | MarketDataError::InvalidRange { .. } => {
                AppError::BadRequest {
                    code: err.code(),
                    message: err.to_string(),
                }
            }
            MarketDataError::RateLimited { .. } => AppError::RateLimited {
                retry_after: err.retry_after(),
            },
            MarketDataError::UpstreamUnavailable { .. } => {
                AppError::ServiceUnavailable(err.to_string())
            }
            MarketDataError::UpstreamDataInvalid { .. } => AppError::BadGateway,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after_secs = None;
        let (status, error_message, code) = match self {
            AppError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, message, code),
            AppError::RateLimited { retry_after } => {
                // Whole seconds, rounded up so clients never retry early
                retry_after_secs = retry_after.map(|d| d.as_millis().div_ceil(1_000).max(1));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Rate limited by upstream provider".to_string(),
                    "RATE_LIMITED",
                )
            }
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                msg,
                "UPSTREAM_UNAVAILABLE",
            ),
            AppError::BadGateway => (
                StatusCode::BAD_GATEWAY,
                "Upstream provider returned unusable data".to_string(),
                "UPSTREAM_DATA_INVALID",
            ),
            AppError::InternalError(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": error_message
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs as u64));
        }
        response
    }
}
