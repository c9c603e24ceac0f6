//! Per-connection outbound queue
//!
//! Bounded FIFO between the dispatcher (producer) and one connection's
//! transport writer (consumer). When the queue is full a new update
//! replaces the oldest queued update for the same symbol, so a slow client
//! always converges on the latest bar per symbol instead of falling further
//! behind. With no same-symbol bar queued, the oldest queued bar is dropped;
//! error notices are only evicted when nothing else is queued. Per-symbol
//! order is preserved either way.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;
use types::ids::ConnectionId;

use crate::metrics::ServiceMetrics;
use crate::protocol::ServerMessage;

/// What happened to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the oldest queued bar for the same symbol was dropped.
    ReplacedSameSymbol,
    /// Queue full; the oldest queued bar (or, with only error notices
    /// queued, the oldest notice) was dropped.
    DroppedOldest,
    /// The connection is closing; the message was discarded.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<ServerMessage>,
    closed: bool,
    messages_dropped: u64,
}

pub struct Outbox {
    connection_id: ConnectionId,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl Outbox {
    pub fn new(connection_id: ConnectionId, capacity: usize) -> Self {
        Self {
            connection_id,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enqueue without blocking, applying drop-old-keep-new when full.
    pub fn deliver(&self, message: ServerMessage) -> Delivery {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Delivery::Closed;
            }

            let outcome = if state.messages.len() >= self.capacity {
                let same_symbol = state.messages.iter().position(|queued| {
                    matches!(queued, ServerMessage::Bar { .. }) && queued.symbol() == message.symbol()
                });
                state.messages_dropped += 1;
                match same_symbol {
                    Some(index) => {
                        state.messages.remove(index);
                        Delivery::ReplacedSameSymbol
                    }
                    None => {
                        // Error notices are sent once; evict a bar instead
                        let oldest_bar = state
                            .messages
                            .iter()
                            .position(|queued| matches!(queued, ServerMessage::Bar { .. }))
                            .unwrap_or(0);
                        state.messages.remove(oldest_bar);
                        Delivery::DroppedOldest
                    }
                }
            } else {
                Delivery::Queued
            };

            state.messages.push_back(message);
            outcome
        };

        if outcome != Delivery::Queued {
            debug!(
                connection_id = %self.connection_id,
                ?outcome,
                "Backpressure: dropped queued message"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_backpressure_drop();
            }
        }
        self.notify.notify_one();
        outcome
    }

    /// Next queued message; waits while empty. `None` once closed.
    pub async fn next(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.messages.pop_front() {
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Next queued message without waiting.
    pub fn try_next(&self) -> Option<ServerMessage> {
        self.state.lock().messages.pop_front()
    }

    /// Discard queued messages and reject further deliveries.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.messages.clear();
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages dropped for this connection.
    pub fn messages_dropped(&self) -> u64 {
        self.state.lock().messages_dropped
    }
}
