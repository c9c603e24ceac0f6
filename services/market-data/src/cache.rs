//! Snapshot cache
//!
//! Bounded TTL + LRU cache of chart responses with request coalescing.
//! Concurrent misses for one key share a single in-flight fetch: the
//! in-flight table maps the key to a `OnceCell`, the first caller to reach
//! it runs the fetch and every other caller awaits the same cell, so all of
//! them see the same response or the same error.
//!
//! Successful responses are cached; errors never are. A response is stored
//! before its in-flight slot is released, so a caller arriving in between
//! finds one or the other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;
use types::asset::AssetClass;
use types::chart::{ChartDataParams, ChartDataResponse, Timespan};
use types::errors::MarketDataResult;

use crate::config::CacheConfig;

pub type SharedResponse = Arc<ChartDataResponse>;

type InFlight = Arc<OnceCell<MarketDataResult<SharedResponse>>>;

/// Cache identity of a snapshot query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset_class: AssetClass,
    pub symbol: String,
    pub timespan: Timespan,
    pub limit: u32,
}

impl CacheKey {
    pub fn new(asset_class: AssetClass, params: &ChartDataParams) -> Self {
        Self {
            asset_class,
            symbol: params.symbol.clone(),
            timespan: params.timespan,
            limit: params.limit,
        }
    }
}

/// Where a `get_or_fetch` answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    /// This caller ran the upstream fetch.
    Fetched,
    /// This caller waited on another caller's fetch.
    Coalesced,
}

struct Entry {
    value: SharedResponse,
    inserted_at: Instant,
    last_access: u64,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<CacheKey, Entry>,
    /// Monotonic access counter driving LRU order.
    tick: u64,
}

pub struct ChartCache {
    ttl: Duration,
    max_entries: usize,
    slots: Mutex<Slots>,
    in_flight: DashMap<CacheKey, InFlight>,
}

impl ChartCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_entries: config.max_entries.max(1),
            slots: Mutex::new(Slots::default()),
            in_flight: DashMap::new(),
        }
    }

    /// Fresh cached response for `key`. Expired entries are dropped on sight.
    pub fn get(&self, key: &CacheKey) -> Option<SharedResponse> {
        let mut slots = self.slots.lock();
        slots.tick += 1;
        let tick = slots.tick;

        let fresh = match slots.entries.get_mut(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_access = tick;
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            slots.entries.remove(key);
        }
        fresh
    }

    pub fn insert(&self, key: CacheKey, value: SharedResponse) {
        let mut slots = self.slots.lock();
        slots.tick += 1;
        let entry = Entry {
            value,
            inserted_at: Instant::now(),
            last_access: slots.tick,
        };
        slots.entries.insert(key, entry);

        if slots.entries.len() > self.max_entries {
            let ttl = self.ttl;
            slots.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        }
        while slots.entries.len() > self.max_entries {
            let lru = slots
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match lru {
                Some(k) => {
                    debug!(symbol = k.symbol.as_str(), "Evicting least recently used chart");
                    slots.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Cached response for `key`, or the result of one shared `fetch`.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> (MarketDataResult<SharedResponse>, CacheOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MarketDataResult<SharedResponse>>,
    {
        if let Some(hit) = self.get(key) {
            return (Ok(hit), CacheOutcome::Hit);
        }

        let cell = match self.in_flight.entry(key.clone()) {
            MapEntry::Occupied(e) => e.get().clone(),
            MapEntry::Vacant(e) => e.insert(Arc::new(OnceCell::new())).clone(),
        };

        let mut outcome = CacheOutcome::Coalesced;
        let result = cell
            .get_or_init(|| async {
                // A fetch may have completed between the miss and joining
                if let Some(hit) = self.get(key) {
                    outcome = CacheOutcome::Hit;
                    return Ok(hit);
                }
                outcome = CacheOutcome::Fetched;
                let result = fetch().await;
                if let Ok(response) = &result {
                    self.insert(key.clone(), response.clone());
                }
                result
            })
            .await
            .clone();

        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        (result, outcome)
    }
}
