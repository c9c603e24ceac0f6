//! HTTP upstream provider
//!
//! Speaks a small aggregate-bars REST dialect:
//!
//! ```text
//! GET {base}/v1/bars?symbol=X:BTCUSD&timespan=day&limit=90  -> {"results": [RawBar, ...]}
//! GET {base}/v1/latest?symbol=X:BTCUSD                      -> {"results": RawBar | null}
//! ```
//!
//! Status mapping: 429 is `RateLimited` (honouring `Retry-After` seconds),
//! 5xx and transport failures are `UpstreamUnavailable`, any other
//! non-success status or an unparseable body is `UpstreamDataInvalid`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use types::chart::Timespan;
use types::errors::{MarketDataError, MarketDataResult};

use super::upstream::{RawBar, Upstream};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
struct BarsEnvelope {
    #[serde(default)]
    results: Vec<RawBar>,
}

#[derive(Debug, Deserialize)]
struct LatestEnvelope {
    #[serde(default)]
    results: Option<RawBar>,
}

/// REST client for one provider endpoint.
pub struct HttpUpstream {
    name: String,
    client: Client,
    base_url: Url,
}

impl HttpUpstream {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> MarketDataResult<Self> {
        let name = name.into();
        let base_url = Url::parse(base_url).map_err(|e| {
            MarketDataError::unavailable(format!("{}: invalid base url {:?}: {}", name, base_url, e))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| MarketDataError::unavailable(format!("{}: api key is not a valid header", name)))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| MarketDataError::unavailable(format!("{}: failed to build client: {}", name, e)))?;

        Ok(Self {
            name,
            client,
            base_url,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> MarketDataResult<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| MarketDataError::unavailable(format!("{}: bad endpoint {}: {}", self.name, path, e)))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> MarketDataResult<T> {
        debug!(upstream = self.name.as_str(), %url, "GET");

        let response = self.client.get(url).send().await.map_err(|e| {
            MarketDataError::unavailable(format!("{}: request failed: {}", self.name, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&self.name, status, response.headers()));
        }

        let body = response.text().await.map_err(|e| {
            MarketDataError::unavailable(format!("{}: failed to read body: {}", self.name, e))
        })?;
        serde_json::from_str(&body).map_err(|e| {
            MarketDataError::invalid_data(format!("{}: unparseable body: {}", self.name, e))
        })
    }
}

/// Map a non-success response status to the error taxonomy.
fn status_error(name: &str, status: StatusCode, headers: &HeaderMap) -> MarketDataError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1_000));
        return MarketDataError::RateLimited { retry_after_ms };
    }
    if status.is_server_error() {
        return MarketDataError::unavailable(format!("{}: HTTP {}", name, status.as_u16()));
    }
    MarketDataError::invalid_data(format!("{}: HTTP {}", name, status.as_u16()))
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_bars(
        &self,
        provider_symbol: &str,
        timespan: Timespan,
        limit: u32,
    ) -> MarketDataResult<Vec<RawBar>> {
        let limit = limit.to_string();
        let url = self.endpoint(
            "v1/bars",
            &[
                ("symbol", provider_symbol),
                ("timespan", timespan.as_str()),
                ("limit", limit.as_str()),
            ],
        )?;
        let envelope: BarsEnvelope = self.get_json(url).await?;
        Ok(envelope.results)
    }

    async fn latest(&self, provider_symbol: &str) -> MarketDataResult<Option<RawBar>> {
        let url = self.endpoint("v1/latest", &[("symbol", provider_symbol)])?;
        let envelope: LatestEnvelope = self.get_json(url).await?;
        Ok(envelope.results)
    }
}
