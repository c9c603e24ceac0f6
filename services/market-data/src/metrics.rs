//! Engine metrics
//!
//! Lock-free counters shared by the chart service, the dispatcher and the
//! sessions. Exposed by the gateway as a JSON snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Core metrics for the engine.
pub struct ServiceMetrics {
    // Snapshot path
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub coalesced_waits: AtomicU64,
    pub upstream_fetches: AtomicU64,
    pub chart_latency_us: Mutex<LatencyTracker>,

    // Live path
    pub polls: AtomicU64,
    pub poll_failures: AtomicU64,
    pub updates_published: AtomicU64,

    // Per-client metrics
    pub connected_clients: AtomicU64,
    pub messages_dropped_backpressure: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            coalesced_waits: AtomicU64::new(0),
            upstream_fetches: AtomicU64::new(0),
            chart_latency_us: Mutex::new(LatencyTracker::new(1000)),
            polls: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            updates_published: AtomicU64::new(0),
            connected_clients: AtomicU64::new(0),
            messages_dropped_backpressure: AtomicU64::new(0),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A miss that joined another caller's in-flight fetch.
    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a served chart request.
    pub fn record_chart_latency(&self, latency_us: u64) {
        self.chart_latency_us.lock().record(latency_us);
    }

    pub fn record_poll(&self, success: bool) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.poll_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one update handed to `recipients` subscribers.
    pub fn record_published(&self, recipients: usize) {
        self.updates_published
            .fetch_add(recipients as u64, Ordering::Relaxed);
    }

    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        // Saturate at zero
        let _ = self
            .connected_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record a message dropped due to backpressure.
    pub fn record_backpressure_drop(&self) {
        self.messages_dropped_backpressure
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.chart_latency_us.lock();
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            chart_latency_p50_us: latency.percentile(50),
            chart_latency_p99_us: latency.percentile(99),
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            updates_published: self.updates_published.load(Ordering::Relaxed),
            connected_clients: self.connected_clients.load(Ordering::Relaxed),
            messages_dropped_backpressure: self
                .messages_dropped_backpressure
                .load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub coalesced_waits: u64,
    pub upstream_fetches: u64,
    pub chart_latency_p50_us: Option<u64>,
    pub chart_latency_p99_us: Option<u64>,
    pub polls: u64,
    pub poll_failures: u64,
    pub updates_published: u64,
    pub connected_clients: u64,
    pub messages_dropped_backpressure: u64,
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
