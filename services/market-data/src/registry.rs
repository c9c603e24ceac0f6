//! Subscription Registry
//!
//! Tracks which connections want which symbols, in both directions:
//! connection → symbols for teardown and per-connection limits, and
//! symbol → connections for fan-out. Both indices sit behind one lock, so
//! every operation moves them together and a reader never sees one updated
//! without the other.
//!
//! Once `unsubscribe` or `drop_connection` returns, the connection is no
//! longer under that symbol and fan-out cannot reach it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use types::errors::MarketDataError;
use types::ids::ConnectionId;

use crate::outbox::{Delivery, Outbox};
use crate::protocol::{ErrorReason, ServerMessage};

/// Why a subscription was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Symbol(#[from] MarketDataError),

    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("subscription limit of {max} reached")]
    LimitReached { max: usize },
}

impl SubscribeError {
    /// Client-facing reason, when the client should be told.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            SubscribeError::Symbol(MarketDataError::UnknownSymbol { .. }) => {
                Some(ErrorReason::UnknownSymbol)
            }
            SubscribeError::LimitReached { .. } => Some(ErrorReason::SubscriptionLimit),
            _ => None,
        }
    }
}

/// What a successful `subscribe` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// The symbol gained its first subscriber.
    First,
    /// The connection joined a symbol that already had subscribers.
    Joined,
    /// The connection was already subscribed; nothing changed.
    AlreadySubscribed,
}

/// Result of delivering one message to every subscriber of a symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub recipients: usize,
    /// Deliveries that displaced a queued message.
    pub displaced: usize,
}

struct ConnectionEntry {
    outbox: Arc<Outbox>,
    symbols: BTreeSet<String>,
}

#[derive(Default)]
struct Indices {
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
    subscribers: HashMap<String, BTreeSet<ConnectionId>>,
}

pub struct SubscriptionRegistry {
    indices: RwLock<Indices>,
    max_subscriptions: usize,
}

impl SubscriptionRegistry {
    pub fn new(max_subscriptions: usize) -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
            max_subscriptions,
        }
    }

    /// Associate a connection with its outbound queue.
    pub fn register_connection(&self, connection_id: ConnectionId, outbox: Arc<Outbox>) {
        self.indices.write().connections.insert(
            connection_id,
            ConnectionEntry {
                outbox,
                symbols: BTreeSet::new(),
            },
        );
        debug!(%connection_id, "Registered connection");
    }

    /// Add `symbol` to the connection's subscriptions.
    ///
    /// Subscribing twice is a no-op.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        symbol: &str,
    ) -> Result<Subscription, SubscribeError> {
        let mut indices = self.indices.write();
        let Indices {
            connections,
            subscribers,
        } = &mut *indices;

        let entry = connections
            .get_mut(&connection_id)
            .ok_or(SubscribeError::UnknownConnection(connection_id))?;
        if entry.symbols.contains(symbol) {
            return Ok(Subscription::AlreadySubscribed);
        }
        if entry.symbols.len() >= self.max_subscriptions {
            return Err(SubscribeError::LimitReached {
                max: self.max_subscriptions,
            });
        }
        entry.symbols.insert(symbol.to_string());

        let set = subscribers.entry(symbol.to_string()).or_default();
        set.insert(connection_id);
        if set.len() == 1 {
            Ok(Subscription::First)
        } else {
            Ok(Subscription::Joined)
        }
    }

    /// Remove `symbol` from the connection's subscriptions.
    ///
    /// Returns `true` when the symbol lost its last subscriber.
    pub fn unsubscribe(&self, connection_id: ConnectionId, symbol: &str) -> bool {
        let mut indices = self.indices.write();
        let Indices {
            connections,
            subscribers,
        } = &mut *indices;

        let removed = connections
            .get_mut(&connection_id)
            .is_some_and(|entry| entry.symbols.remove(symbol));
        if !removed {
            return false;
        }
        remove_subscriber(subscribers, symbol, connection_id)
    }

    /// Forget a connection entirely. Returns the symbols left with no subscribers.
    pub fn drop_connection(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut indices = self.indices.write();
        let Indices {
            connections,
            subscribers,
        } = &mut *indices;

        let Some(entry) = connections.remove(&connection_id) else {
            return Vec::new();
        };

        let emptied: Vec<String> = entry
            .symbols
            .into_iter()
            .filter(|symbol| remove_subscriber(subscribers, symbol, connection_id))
            .collect();
        debug!(%connection_id, emptied = emptied.len(), "Dropped connection");
        emptied
    }

    /// Deliver `message` to every subscriber of `symbol`.
    pub fn fan_out(&self, symbol: &str, message: &ServerMessage) -> FanOut {
        let indices = self.indices.read();
        let mut result = FanOut::default();

        let Some(set) = indices.subscribers.get(symbol) else {
            return result;
        };
        for connection_id in set {
            let Some(entry) = indices.connections.get(connection_id) else {
                continue;
            };
            match entry.outbox.deliver(message.clone()) {
                Delivery::Queued => result.recipients += 1,
                Delivery::ReplacedSameSymbol | Delivery::DroppedOldest => {
                    result.recipients += 1;
                    result.displaced += 1;
                }
                Delivery::Closed => {}
            }
        }
        result
    }

    /// Deliver `message` to one connection if it is subscribed to `symbol`.
    pub fn deliver_to(&self, connection_id: ConnectionId, symbol: &str, message: ServerMessage) -> bool {
        let indices = self.indices.read();
        match indices.connections.get(&connection_id) {
            Some(entry) if entry.symbols.contains(symbol) => {
                !matches!(entry.outbox.deliver(message), Delivery::Closed)
            }
            _ => false,
        }
    }

    pub fn subscribers(&self, symbol: &str) -> Vec<ConnectionId> {
        self.indices
            .read()
            .subscribers
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.indices
            .read()
            .subscribers
            .get(symbol)
            .map_or(0, BTreeSet::len)
    }

    pub fn symbols_for(&self, connection_id: ConnectionId) -> Vec<String> {
        self.indices
            .read()
            .connections
            .get(&connection_id)
            .map(|entry| entry.symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.indices.read().connections.len()
    }

    /// Symbols with at least one subscriber.
    pub fn symbol_count(&self) -> usize {
        self.indices.read().subscribers.len()
    }
}

/// Remove one subscriber; drops the symbol's set when it empties.
fn remove_subscriber(
    subscribers: &mut HashMap<String, BTreeSet<ConnectionId>>,
    symbol: &str,
    connection_id: ConnectionId,
) -> bool {
    let Some(set) = subscribers.get_mut(symbol) else {
        return false;
    };
    set.remove(&connection_id);
    if set.is_empty() {
        subscribers.remove(symbol);
        true
    } else {
        false
    }
}
