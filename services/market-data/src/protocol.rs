//! Live stream wire protocol
//!
//! JSON text frames, tagged by `type`:
//!
//! ```text
//! client → server  {"type":"subscribe","symbol":"BTCUSD"}
//!                  {"type":"unsubscribe","symbol":"BTCUSD"}
//! server → client  {"type":"bar","symbol":"BTCUSD","bar":{...}}
//!                  {"type":"error","symbol":"ZZZ1","reason":"unknown_symbol"}
//! ```
//!
//! Frames are validated here, before any symbol reaches the router.

use serde::{Deserialize, Serialize};
use types::bar::{BarUpdate, HistoricalBar};

/// Longest symbol accepted from a client.
pub const MAX_SYMBOL_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
}

impl ClientMessage {
    pub fn symbol(&self) -> &str {
        match self {
            ClientMessage::Subscribe { symbol } | ClientMessage::Unsubscribe { symbol } => symbol,
        }
    }
}

/// Why a symbol-scoped error was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    UnknownSymbol,
    /// Live updates for the symbol keep failing; polling continues.
    Degraded,
    SubscriptionLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Bar { symbol: String, bar: HistoricalBar },
    Error { symbol: String, reason: ErrorReason },
}

impl ServerMessage {
    pub fn error(symbol: impl Into<String>, reason: ErrorReason) -> Self {
        ServerMessage::Error {
            symbol: symbol.into(),
            reason,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            ServerMessage::Bar { symbol, .. } | ServerMessage::Error { symbol, .. } => symbol,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

impl From<BarUpdate> for ServerMessage {
    fn from(update: BarUpdate) -> Self {
        ServerMessage::Bar {
            symbol: update.symbol,
            bar: update.bar,
        }
    }
}

/// A frame the session cannot accept. Fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("symbol is empty")]
    EmptySymbol,

    #[error("symbol longer than {max} characters")]
    SymbolTooLong { max: usize },

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Parse and validate one client text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let message: ClientMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let symbol = message.symbol().trim();
    if symbol.is_empty() {
        return Err(ProtocolError::EmptySymbol);
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        return Err(ProtocolError::SymbolTooLong {
            max: MAX_SYMBOL_LEN,
        });
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_parse_subscribe() {
        let msg = parse_client_message(r#"{"type":"subscribe","symbol":"BTCUSD"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                symbol: "BTCUSD".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unsubscribe() {
        let msg = parse_client_message(r#"{"type":"unsubscribe","symbol":"AAPL"}"#).unwrap();
        assert_eq!(msg.symbol(), "AAPL");
    }

    #[test]
    fn test_malformed_frames() {
        for frame in [
            "not json",
            r#"{"type":"subscribe"}"#,
            r#"{"type":"ping","symbol":"AAPL"}"#,
            r#"{"symbol":"AAPL"}"#,
            r#"{"type":"subscribe","symbol":42}"#,
        ] {
            assert!(
                matches!(parse_client_message(frame), Err(ProtocolError::Malformed(_))),
                "{}",
                frame
            );
        }
    }

    #[test]
    fn test_symbol_validation() {
        assert_eq!(
            parse_client_message(r#"{"type":"subscribe","symbol":"  "}"#),
            Err(ProtocolError::EmptySymbol)
        );
        let long = format!(r#"{{"type":"subscribe","symbol":"{}"}}"#, "A".repeat(33));
        assert_eq!(
            parse_client_message(&long),
            Err(ProtocolError::SymbolTooLong { max: 32 })
        );
    }

    #[test]
    fn test_bar_message_shape() {
        let update = BarUpdate::new(
            "BTCUSD",
            HistoricalBar::flat(100, Decimal::from(50_000), Decimal::ONE),
        );
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::from(update).encode().unwrap()).unwrap();

        assert_eq!(json["type"], "bar");
        assert_eq!(json["symbol"], "BTCUSD");
        assert_eq!(json["bar"]["time"], 100);
        assert_eq!(json["bar"]["close"], "50000");
    }

    #[test]
    fn test_error_message_shape() {
        let json = ServerMessage::error("ZZZ1", ErrorReason::UnknownSymbol)
            .encode()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","symbol":"ZZZ1","reason":"unknown_symbol"}"#
        );
    }
}
