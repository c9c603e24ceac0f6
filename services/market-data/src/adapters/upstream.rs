//! Upstream provider contract
//!
//! An [`Upstream`] is the opaque collaborator behind an adapter: it owns
//! authentication, endpoint selection and wire parsing, and hands back
//! provider-native [`RawBar`]s. Adapters never see transport details.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use types::chart::Timespan;
use types::errors::MarketDataResult;

/// A provider timestamp: epoch integer in the provider's unit, or text
/// (RFC 3339 or a decimal epoch integer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(i64),
    Text(String),
}

/// A provider number: JSON number or numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(serde_json::Number),
    Text(String),
}

impl RawNumber {
    /// Exact decimal value, accepting scientific notation.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let text = match self {
            RawNumber::Number(n) => n.to_string(),
            RawNumber::Text(s) => s.trim().to_string(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }
}

impl From<Decimal> for RawNumber {
    fn from(value: Decimal) -> Self {
        RawNumber::Text(value.to_string())
    }
}

/// One bar as the provider reports it.
///
/// Field names follow the short aggregate form (`t`, `o`, `h`, `l`, `c`,
/// `v`); long names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBar {
    #[serde(alias = "timestamp", alias = "time")]
    pub t: RawTimestamp,
    #[serde(alias = "open")]
    pub o: RawNumber,
    #[serde(alias = "high")]
    pub h: RawNumber,
    #[serde(alias = "low")]
    pub l: RawNumber,
    #[serde(alias = "close")]
    pub c: RawNumber,
    /// Some providers (forex in particular) report no volume.
    #[serde(default, alias = "volume")]
    pub v: Option<RawNumber>,
}

impl RawBar {
    pub fn new(
        t: i64,
        o: Decimal,
        h: Decimal,
        l: Decimal,
        c: Decimal,
        v: Option<Decimal>,
    ) -> Self {
        Self {
            t: RawTimestamp::Epoch(t),
            o: o.into(),
            h: h.into(),
            l: l.into(),
            c: c.into(),
            v: v.map(RawNumber::from),
        }
    }
}

/// Data source behind one asset-class adapter.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Historical bars for a provider-formatted symbol.
    async fn fetch_bars(
        &self,
        provider_symbol: &str,
        timespan: Timespan,
        limit: u32,
    ) -> MarketDataResult<Vec<RawBar>>;

    /// Most recent (possibly still forming) bar, `None` if the provider
    /// has nothing new to report.
    async fn latest(&self, provider_symbol: &str) -> MarketDataResult<Option<RawBar>>;

    /// Push feed of bar updates, when the provider offers one.
    fn live_feed(&self, _provider_symbol: &str) -> Option<broadcast::Receiver<RawBar>> {
        None
    }
}
