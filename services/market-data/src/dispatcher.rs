//! Update Dispatcher
//!
//! Owns the idle ↔ active lifecycle of every live symbol. The first
//! subscriber starts one worker task for the symbol; the last unsubscribe
//! (or connection drop) stops it. Registry changes and worker start/stop
//! happen under the same lock, so a symbol never has subscribers without a
//! worker or a worker without subscribers for longer than one operation.
//!
//! A worker consumes the provider's push feed when the adapter offers one
//! and polls otherwise. Polling workers of one asset class share a fraction
//! of their adapter's rate limit (`poll_budget_share`): each spaces its polls
//! by the class's poller count and waits for a gate token before calling
//! out, so the adapter's own limit never counts as a poll failure. Failed
//! polls back off exponentially up to a cap. After `degraded_after_failures`
//! consecutive failures subscribers get one `degraded` error; the worker
//! keeps retrying and the symbol recovers on the next success.
//!
//! A connection that joins an active symbol is sent the symbol's last bar
//! straight away instead of waiting for the next change.
//!
//! Stopping a worker never cancels an upstream call that is already in
//! flight; its result is discarded when it lands. Once `stop_worker`
//! returns, the stopped worker publishes nothing more.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::asset::AssetClass;
use types::bar::HistoricalBar;
use types::ids::ConnectionId;

use crate::adapters::{Adapter, AdapterSet, RawBar};
use crate::config::DispatcherConfig;
use crate::metrics::ServiceMetrics;
use crate::protocol::{ErrorReason, ServerMessage};
use crate::registry::{SubscribeError, Subscription, SubscriptionRegistry};
use crate::router::SymbolRouter;

/// Live state of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    Idle,
    Active,
    /// Active, but recent upstream calls keep failing.
    Degraded,
}

/// Last bar a worker published. Locked for the whole of a publish.
type LatestBar = Arc<Mutex<Option<HistoricalBar>>>;

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    degraded: Arc<AtomicBool>,
    latest: LatestBar,
}

/// Number of polling workers per asset class.
#[derive(Default)]
struct PollLoad {
    pollers: [AtomicUsize; 3],
}

impl PollLoad {
    fn slot(class: AssetClass) -> usize {
        match class {
            AssetClass::Crypto => 0,
            AssetClass::Stock => 1,
            AssetClass::Forex => 2,
        }
    }

    fn pollers(&self, class: AssetClass) -> usize {
        self.pollers[Self::slot(class)].load(Ordering::Acquire)
    }

    fn enter(self: &Arc<Self>, class: AssetClass) -> PollerGuard {
        self.pollers[Self::slot(class)].fetch_add(1, Ordering::AcqRel);
        PollerGuard {
            load: self.clone(),
            class,
        }
    }
}

/// Counts one worker as polling until dropped.
struct PollerGuard {
    load: Arc<PollLoad>,
    class: AssetClass,
}

impl Drop for PollerGuard {
    fn drop(&mut self) {
        self.load.pollers[PollLoad::slot(self.class)].fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct UpdateDispatcher {
    router: Arc<SymbolRouter>,
    adapters: Arc<AdapterSet>,
    registry: Arc<SubscriptionRegistry>,
    config: DispatcherConfig,
    metrics: Arc<ServiceMetrics>,
    poll_load: Arc<PollLoad>,
    workers: Mutex<HashMap<String, Worker>>,
}

impl UpdateDispatcher {
    pub fn new(
        router: Arc<SymbolRouter>,
        adapters: Arc<AdapterSet>,
        registry: Arc<SubscriptionRegistry>,
        config: DispatcherConfig,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            router,
            adapters,
            registry,
            config,
            metrics,
            poll_load: Arc::new(PollLoad::default()),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Subscribe a connection; returns the canonical symbol.
    ///
    /// Must be called from within a tokio runtime: the first subscriber
    /// spawns the symbol's worker.
    pub fn subscribe(&self, connection_id: ConnectionId, symbol: &str) -> Result<String, SubscribeError> {
        let resolved = self.router.resolve(symbol)?;
        let canonical = resolved.canonical;

        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get(&canonical) {
            // Holding the latest bar keeps a concurrent publish from also
            // reaching the joiner
            let latest = worker.latest.lock();
            if self.registry.subscribe(connection_id, &canonical)? == Subscription::Joined {
                if let Some(bar) = latest.as_ref() {
                    let message = ServerMessage::Bar {
                        symbol: canonical.clone(),
                        bar: bar.clone(),
                    };
                    self.registry.deliver_to(connection_id, &canonical, message);
                }
            }
            return Ok(canonical);
        }

        self.registry.subscribe(connection_id, &canonical)?;
        let worker = self.spawn_worker(canonical.clone(), resolved.asset_class);
        workers.insert(canonical.clone(), worker);
        info!(symbol = canonical.as_str(), "Symbol active");
        Ok(canonical)
    }

    /// Unsubscribe a connection. Unknown symbols and absent subscriptions are no-ops.
    pub fn unsubscribe(&self, connection_id: ConnectionId, symbol: &str) {
        let Ok(resolved) = self.router.resolve(symbol) else {
            return;
        };
        let mut workers = self.workers.lock();
        if self.registry.unsubscribe(connection_id, &resolved.canonical) {
            stop_worker(&mut workers, &resolved.canonical);
        }
    }

    /// Remove a connection from every symbol, idling symbols it was the last subscriber of.
    pub fn drop_connection(&self, connection_id: ConnectionId) {
        let mut workers = self.workers.lock();
        for symbol in self.registry.drop_connection(connection_id) {
            stop_worker(&mut workers, &symbol);
        }
    }

    pub fn symbol_state(&self, symbol: &str) -> SymbolState {
        let canonical = match self.router.resolve(symbol) {
            Ok(resolved) => resolved.canonical,
            Err(_) => return SymbolState::Idle,
        };
        match self.workers.lock().get(&canonical) {
            None => SymbolState::Idle,
            Some(worker) if worker.degraded.load(Ordering::Acquire) => SymbolState::Degraded,
            Some(_) => SymbolState::Active,
        }
    }

    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.workers.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Stop every worker and wait for them to exit.
    pub async fn shutdown(&self) {
        let workers: Vec<(String, Worker)> = self.workers.lock().drain().collect();
        info!(workers = workers.len(), "Stopping dispatcher");
        for (_, worker) in &workers {
            let _ = worker.stop.send(true);
        }
        for (symbol, worker) in workers {
            if let Err(e) = worker.handle.await {
                warn!(symbol = symbol.as_str(), error = %e, "Worker task failed");
            }
        }
    }

    fn spawn_worker(&self, symbol: String, asset_class: AssetClass) -> Worker {
        let (task, stop) = self.worker_task(symbol, asset_class);
        Worker {
            stop,
            degraded: task.degraded.clone(),
            latest: task.latest.clone(),
            handle: tokio::spawn(task.run()),
        }
    }

    fn worker_task(&self, symbol: String, asset_class: AssetClass) -> (SymbolWorker, watch::Sender<bool>) {
        let (stop, stop_rx) = watch::channel(false);
        let task = SymbolWorker {
            symbol,
            asset_class,
            adapters: self.adapters.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            poll_load: self.poll_load.clone(),
            degraded: Arc::new(AtomicBool::new(false)),
            stop: stop_rx,
            latest: Arc::new(Mutex::new(None)),
        };
        (task, stop)
    }
}

fn stop_worker(workers: &mut HashMap<String, Worker>, symbol: &str) {
    if let Some(worker) = workers.remove(symbol) {
        // Waits out a publish in progress; later ones see the stop
        let _latest = worker.latest.lock();
        let _ = worker.stop.send(true);
        info!(symbol, "Symbol idle");
    }
}

/// How a push feed ended.
enum FeedEnd {
    Stopped,
    Closed,
}

struct SymbolWorker {
    symbol: String,
    asset_class: AssetClass,
    adapters: Arc<AdapterSet>,
    registry: Arc<SubscriptionRegistry>,
    config: DispatcherConfig,
    metrics: Arc<ServiceMetrics>,
    poll_load: Arc<PollLoad>,
    degraded: Arc<AtomicBool>,
    stop: watch::Receiver<bool>,
    latest: LatestBar,
}

impl SymbolWorker {
    async fn run(mut self) {
        let adapters = self.adapters.clone();
        let adapter = adapters.for_class(self.asset_class);

        if let Some(feed) = adapter.live_feed(&self.symbol) {
            debug!(symbol = self.symbol.as_str(), "Consuming push feed");
            match self.consume_feed(adapter, feed).await {
                FeedEnd::Stopped => return,
                FeedEnd::Closed => {
                    warn!(symbol = self.symbol.as_str(), "Push feed closed, falling back to polling");
                }
            }
        }
        self.poll(adapter).await;
        debug!(symbol = self.symbol.as_str(), "Worker stopped");
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn consume_feed(&mut self, adapter: &Adapter, mut feed: broadcast::Receiver<RawBar>) -> FeedEnd {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.stop.changed() => return FeedEnd::Stopped,
                received = feed.recv() => received,
            };
            match received {
                Ok(raw) => match adapter.normalize(&raw) {
                    Ok(bar) => self.publish(bar),
                    Err(e) => warn!(symbol = self.symbol.as_str(), error = %e, "Dropping pushed bar"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(symbol = self.symbol.as_str(), skipped, "Push feed lagged");
                }
                Err(RecvError::Closed) => return FeedEnd::Closed,
            }
        }
    }

    /// Spacing that keeps this class's pollers inside their share of the
    /// adapter's rate limit.
    fn poll_interval(&self, adapter: &Adapter) -> Duration {
        let pollers = self.poll_load.pollers(self.asset_class).max(1) as f64;
        let budgeted = adapter.min_poll_interval().as_secs_f64() * pollers
            / self.config.poll_budget_share;
        let budgeted = Duration::try_from_secs_f64(budgeted).unwrap_or(Duration::MAX);
        self.config.poll_interval().max(budgeted)
    }

    async fn poll(&mut self, adapter: &Adapter) {
        let _poller = self.poll_load.enter(self.asset_class);
        let mut failures: u32 = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.stop.changed() => return,
                permit = adapter.poll_permit() => permit,
            };
            let result = adapter.poll_latest(&self.symbol, permit).await;
            if self.stopped() {
                debug!(symbol = self.symbol.as_str(), "Discarding in-flight poll result");
                return;
            }

            let delay = match result {
                Ok(latest) => {
                    self.metrics.record_poll(true);
                    if failures >= self.config.degraded_after_failures {
                        info!(symbol = self.symbol.as_str(), failures, "Symbol recovered");
                    }
                    failures = 0;
                    self.degraded.store(false, Ordering::Release);
                    if let Some(bar) = latest {
                        self.publish(bar);
                    }
                    self.poll_interval(adapter)
                }
                Err(err) => {
                    self.metrics.record_poll(false);
                    failures = failures.saturating_add(1);
                    let backoff = self.config.backoff_for(failures);
                    // A provider hint can only lengthen the wait
                    let delay = err.retry_after().map_or(backoff, |hint| hint.max(backoff));
                    warn!(
                        symbol = self.symbol.as_str(),
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Poll failed"
                    );
                    if failures == self.config.degraded_after_failures {
                        self.mark_degraded();
                    }
                    delay
                }
            };

            if !self.sleep_unless_stopped(delay).await {
                return;
            }
        }
    }

    /// Returns `false` if the worker was stopped while waiting.
    async fn sleep_unless_stopped(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.changed() => false,
            _ = tokio::time::sleep(delay) => !self.stopped(),
        }
    }

    fn mark_degraded(&self) {
        let _latest = self.latest.lock();
        if self.stopped() {
            return;
        }
        self.degraded.store(true, Ordering::Release);
        let notice = ServerMessage::error(self.symbol.clone(), ErrorReason::Degraded);
        let fan_out = self.registry.fan_out(&self.symbol, &notice);
        warn!(
            symbol = self.symbol.as_str(),
            notified = fan_out.recipients,
            "Symbol degraded"
        );
    }

    /// Publish `bar` unless it is older than, or identical to, the last one.
    fn publish(&self, bar: HistoricalBar) {
        let mut latest = self.latest.lock();
        if self.stopped() {
            return;
        }
        if let Some(last) = latest.as_ref() {
            if bar.time < last.time || bar == *last {
                return;
            }
        }
        let message = ServerMessage::Bar {
            symbol: self.symbol.clone(),
            bar: bar.clone(),
        };
        let fan_out = self.registry.fan_out(&self.symbol, &message);
        self.metrics.record_published(fan_out.recipients);
        *latest = Some(bar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockUpstream, Upstreams};
    use crate::config::{AdaptersConfig, RouterConfig};
    use crate::outbox::Outbox;
    use rust_decimal::Decimal;
    use types::errors::MarketDataError;

    struct Fixture {
        dispatcher: UpdateDispatcher,
        crypto: Arc<MockUpstream>,
    }

    fn fixture(config: DispatcherConfig) -> Fixture {
        let crypto = Arc::new(MockUpstream::new("crypto"));
        let upstreams = Upstreams {
            stock: Arc::new(MockUpstream::new("stocks")),
            crypto: crypto.clone(),
            forex: Arc::new(MockUpstream::new("forex")),
        };
        let dispatcher = UpdateDispatcher::new(
            Arc::new(SymbolRouter::new(&RouterConfig::default())),
            Arc::new(AdapterSet::new(upstreams, &AdaptersConfig::default())),
            Arc::new(SubscriptionRegistry::new(10)),
            config,
            Arc::new(ServiceMetrics::new()),
        );
        Fixture { dispatcher, crypto }
    }

    fn connect(dispatcher: &UpdateDispatcher) -> (ConnectionId, Arc<Outbox>) {
        let id = ConnectionId::new();
        let outbox = Arc::new(Outbox::new(id, 16));
        dispatcher.registry().register_connection(id, outbox.clone());
        (id, outbox)
    }

    fn raw(time_secs: i64, close: i64) -> RawBar {
        let c = Decimal::from(close);
        RawBar::new(time_secs * 1_000, c, c, c, c, Some(Decimal::ONE))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_symbol_rejected() {
        let f = fixture(DispatcherConfig::default());
        let (id, _) = connect(&f.dispatcher);

        let err = f.dispatcher.subscribe(id, "ZZZ1").unwrap_err();
        assert_eq!(err.reason(), Some(ErrorReason::UnknownSymbol));
        assert!(f.dispatcher.active_symbols().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spellings_share_one_worker() {
        let f = fixture(DispatcherConfig::default());
        let (a, _) = connect(&f.dispatcher);
        let (b, _) = connect(&f.dispatcher);

        assert_eq!(f.dispatcher.subscribe(a, "BTC/USD").unwrap(), "BTCUSD");
        assert_eq!(f.dispatcher.subscribe(b, "btcusd").unwrap(), "BTCUSD");
        assert_eq!(f.dispatcher.active_symbols(), vec!["BTCUSD".to_string()]);

        f.dispatcher.unsubscribe(a, "X:BTCUSD");
        assert_eq!(f.dispatcher.symbol_state("BTCUSD"), SymbolState::Active);
        f.dispatcher.unsubscribe(b, "BTCUSD");
        assert_eq!(f.dispatcher.symbol_state("BTCUSD"), SymbolState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_bars_not_republished() {
        let f = fixture(DispatcherConfig::default());
        f.crypto.push_latest(Ok(Some(raw(100, 50_000))));
        f.crypto.push_latest(Ok(Some(raw(100, 50_000))));
        f.crypto.push_latest(Ok(Some(raw(40, 49_000))));
        f.crypto.push_latest(Ok(Some(raw(100, 50_100))));

        let (id, outbox) = connect(&f.dispatcher);
        f.dispatcher.subscribe(id, "BTCUSD").unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let closes: Vec<Decimal> = std::iter::from_fn(|| outbox.try_next())
            .filter_map(|m| match m {
                ServerMessage::Bar { bar, .. } => Some(bar.close),
                _ => None,
            })
            .collect();
        // Stale (time 40) and unchanged bars are skipped; an in-place update is sent
        assert_eq!(closes, vec![Decimal::from(50_000), Decimal::from(50_100)]);
        f.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_feed_preferred_over_polling() {
        let f = fixture(DispatcherConfig::default());
        let feed = f.crypto.enable_feed("X:ETHUSD");

        let (id, outbox) = connect(&f.dispatcher);
        f.dispatcher.subscribe(id, "ETHUSD").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        feed.send(raw(60, 3_000)).unwrap();
        let message = tokio::time::timeout(Duration::from_secs(1), outbox.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.symbol(), "ETHUSD");
        assert_eq!(f.crypto.latest_calls(), 0);

        f.dispatcher.shutdown().await;
        assert!(f.dispatcher.active_symbols().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off() {
        let f = fixture(DispatcherConfig {
            poll_interval_ms: 100,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 4_000,
            degraded_after_failures: 10,
            ..DispatcherConfig::default()
        });
        for _ in 0..4 {
            f.crypto.push_latest(Err(MarketDataError::unavailable("down")));
        }

        let (id, _outbox) = connect(&f.dispatcher);
        f.dispatcher.subscribe(id, "BTCUSD").unwrap();

        // Polls at t=0, 1s, 3s, 7s (backoff 1s, 2s, 4s)
        tokio::time::sleep(Duration::from_millis(6_900)).await;
        assert_eq!(f.crypto.latest_calls(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.crypto.latest_calls(), 4);
        f.dispatcher.shutdown().await;
    }

    fn closes(outbox: &Outbox) -> Vec<Decimal> {
        std::iter::from_fn(|| outbox.try_next())
            .filter_map(|m| match m {
                ServerMessage::Bar { bar, .. } => Some(bar.close),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_gets_current_bar() {
        let f = fixture(DispatcherConfig::default());
        f.crypto.push_latest(Ok(Some(raw(100, 50_000))));

        let (a, outbox_a) = connect(&f.dispatcher);
        f.dispatcher.subscribe(a, "BTCUSD").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(closes(&outbox_a), vec![Decimal::from(50_000)]);

        // The bar does not change again, so no poll would republish it
        let (b, outbox_b) = connect(&f.dispatcher);
        f.dispatcher.subscribe(b, "BTCUSD").unwrap();
        assert_eq!(closes(&outbox_b), vec![Decimal::from(50_000)]);
        assert!(outbox_a.is_empty());

        // Subscribing again is not a join
        f.dispatcher.subscribe(b, "BTCUSD").unwrap();
        assert!(outbox_b.is_empty());

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert!(outbox_a.is_empty());
        assert!(outbox_b.is_empty());
        f.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_worker_publishes_nothing() {
        let f = fixture(DispatcherConfig::default());
        let (id, outbox) = connect(&f.dispatcher);
        f.dispatcher.registry().subscribe(id, "BTCUSD").unwrap();

        let (task, stop) = f.dispatcher.worker_task("BTCUSD".to_string(), AssetClass::Crypto);
        let bar = |time: i64| HistoricalBar::flat(time, Decimal::ONE, Decimal::ONE);
        task.publish(bar(60));
        assert_eq!(outbox.len(), 1);

        stop.send(true).unwrap();
        task.publish(bar(120));
        task.mark_degraded();
        assert_eq!(outbox.len(), 1);
        assert!(!task.degraded.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn test_class_pollers_share_rate_budget() {
        let f = fixture(DispatcherConfig::default());
        let (id, outbox) = connect(&f.dispatcher);
        // Crypto gate: 10 burst, 5/s. Eight pollers at 80% get 2s spacing.
        for base in ["BTC", "ETH", "SOL", "XRP", "ADA", "DOGE", "DOT", "LTC"] {
            f.dispatcher.subscribe(id, &format!("{}USD", base)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10_050)).await;

        let metrics = f.dispatcher.metrics().snapshot();
        assert_eq!(metrics.poll_failures, 0);
        // Sustained rate stays at or under 5 polls/s
        assert!(f.crypto.latest_calls() <= 10 + 50);
        assert!(f.crypto.latest_calls() >= 8 * 5);
        assert!(std::iter::from_fn(|| outbox.try_next())
            .all(|m| !matches!(m, ServerMessage::Error { .. })));
        f.dispatcher.shutdown().await;
    }
}
