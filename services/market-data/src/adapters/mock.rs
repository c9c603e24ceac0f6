//! Scripted upstream for tests.
//!
//! Results queued with `push_*` are returned first, in order. Once the
//! queue is empty, `fetch_bars` returns the bars set with [`MockUpstream::set_bars`]
//! and `latest` repeats the last successful value it returned.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use types::chart::Timespan;
use types::errors::MarketDataResult;

use super::upstream::{RawBar, Upstream};

const FEED_CAPACITY: usize = 64;

pub struct MockUpstream {
    name: String,
    latency: Option<Duration>,
    bars: Mutex<Vec<RawBar>>,
    fetch_script: Mutex<VecDeque<MarketDataResult<Vec<RawBar>>>>,
    latest_script: Mutex<VecDeque<MarketDataResult<Option<RawBar>>>>,
    last_latest: Mutex<Option<RawBar>>,
    last_fetch_symbol: Mutex<Option<String>>,
    feeds: Mutex<HashMap<String, broadcast::Sender<RawBar>>>,
    fetch_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl MockUpstream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: None,
            bars: Mutex::new(Vec::new()),
            fetch_script: Mutex::new(VecDeque::new()),
            latest_script: Mutex::new(VecDeque::new()),
            last_latest: Mutex::new(None),
            last_fetch_symbol: Mutex::new(None),
            feeds: Mutex::new(HashMap::new()),
            fetch_calls: AtomicUsize::new(0),
            latest_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every call by `latency` (uses tokio time, so paused clocks apply).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_bars(&self, bars: Vec<RawBar>) {
        *self.bars.lock() = bars;
    }

    pub fn push_fetch_result(&self, result: MarketDataResult<Vec<RawBar>>) {
        self.fetch_script.lock().push_back(result);
    }

    pub fn push_latest(&self, result: MarketDataResult<Option<RawBar>>) {
        self.latest_script.lock().push_back(result);
    }

    /// Open a push feed for `provider_symbol`; the returned sender drives it.
    pub fn enable_feed(&self, provider_symbol: &str) -> broadcast::Sender<RawBar> {
        self.feeds
            .lock()
            .entry(provider_symbol.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn last_fetch_symbol(&self) -> Option<String> {
        self.last_fetch_symbol.lock().clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_bars(
        &self,
        provider_symbol: &str,
        _timespan: Timespan,
        _limit: u32,
    ) -> MarketDataResult<Vec<RawBar>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_fetch_symbol.lock() = Some(provider_symbol.to_string());
        self.simulate_latency().await;

        let scripted = self.fetch_script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.bars.lock().clone()),
        }
    }

    async fn latest(&self, _provider_symbol: &str) -> MarketDataResult<Option<RawBar>> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let scripted = self.latest_script.lock().pop_front();
        match scripted {
            Some(Ok(bar)) => {
                if bar.is_some() {
                    *self.last_latest.lock() = bar.clone();
                }
                Ok(bar)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self.last_latest.lock().clone()),
        }
    }

    fn live_feed(&self, provider_symbol: &str) -> Option<broadcast::Receiver<RawBar>> {
        self.feeds.lock().get(provider_symbol).map(|tx| tx.subscribe())
    }
}
