//! Connection Session
//!
//! One live client connection: parses its frames, applies subscribe and
//! unsubscribe through the dispatcher, and owns its bounded outbox. The
//! transport runs a reader that feeds [`ConnectionSession::handle_text`]
//! and a writer that drains [`ConnectionSession::outbox`].
//!
//! Lifecycle: `Connecting → Open → Closing → Closed`. Closing removes every
//! subscription before the outbox is closed, so no update is queued for a
//! connection that is gone. Dropping an open session closes it.

use std::sync::Arc;

use tracing::{debug, info, warn};
use types::ids::ConnectionId;

use crate::config::SessionConfig;
use crate::dispatcher::UpdateDispatcher;
use crate::outbox::{Delivery, Outbox};
use crate::protocol::{parse_client_message, ClientMessage, ProtocolError, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

pub struct ConnectionSession {
    id: ConnectionId,
    state: SessionState,
    outbox: Arc<Outbox>,
    dispatcher: Arc<UpdateDispatcher>,
}

impl ConnectionSession {
    /// Register a new connection with the dispatcher's registry.
    pub fn open(dispatcher: Arc<UpdateDispatcher>, config: &SessionConfig) -> Self {
        let id = ConnectionId::new();
        let outbox = Arc::new(
            Outbox::new(id, config.outbound_capacity).with_metrics(dispatcher.metrics().clone()),
        );
        let mut session = Self {
            id,
            state: SessionState::Connecting,
            outbox,
            dispatcher,
        };

        session
            .dispatcher
            .registry()
            .register_connection(id, session.outbox.clone());
        session.dispatcher.metrics().client_connected();
        session.state = SessionState::Open;
        info!(connection_id = %id, "Session opened");
        session
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Shared handle for the transport writer.
    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    /// Apply one client text frame. A protocol error is fatal: the caller
    /// should close the session.
    pub fn handle_text(&mut self, frame: &str) -> Result<(), ProtocolError> {
        let message = parse_client_message(frame).inspect_err(|e| {
            warn!(connection_id = %self.id, error = %e, "Protocol error");
        })?;
        match message {
            ClientMessage::Subscribe { symbol } => self.subscribe(&symbol),
            ClientMessage::Unsubscribe { symbol } => self.unsubscribe(&symbol),
        }
        Ok(())
    }

    /// Subscribe to `symbol`; refusals are reported on the outbox.
    pub fn subscribe(&mut self, symbol: &str) {
        if self.state != SessionState::Open {
            return;
        }
        match self.dispatcher.subscribe(self.id, symbol) {
            Ok(canonical) => {
                debug!(connection_id = %self.id, symbol = canonical.as_str(), "Subscribed");
            }
            Err(err) => {
                debug!(connection_id = %self.id, symbol, error = %err, "Subscribe refused");
                match err.reason() {
                    Some(reason) => {
                        self.deliver(ServerMessage::error(symbol, reason));
                    }
                    None => warn!(connection_id = %self.id, error = %err, "Subscribe failed"),
                }
            }
        }
    }

    pub fn unsubscribe(&mut self, symbol: &str) {
        if self.state != SessionState::Open {
            return;
        }
        self.dispatcher.unsubscribe(self.id, symbol);
        debug!(connection_id = %self.id, symbol, "Unsubscribed");
    }

    pub fn deliver(&self, message: ServerMessage) -> Delivery {
        self.outbox.deliver(message)
    }

    /// Next message for the transport; `None` once the session is closed.
    pub async fn next_outbound(&self) -> Option<ServerMessage> {
        self.outbox.next().await
    }

    /// Tear down: leave every symbol, then discard queued messages.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;
        self.dispatcher.drop_connection(self.id);
        self.outbox.close();
        self.dispatcher.metrics().client_disconnected();
        self.state = SessionState::Closed;
        info!(connection_id = %self.id, "Session closed");
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
