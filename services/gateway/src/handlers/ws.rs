use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use market_data::protocol::ProtocolError;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut session = state.engine.open_session();
    let connection_id = session.id();
    let outbox = session.outbox();
    let (mut sender, mut receiver) = socket.split();

    // Writer: drain the bounded outbox until it is closed or the peer goes away
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.next().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(%connection_id, error = %e, "Dropping unencodable message");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        let result = match frame {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()),
            Ok(Message::Binary(_)) => Err(ProtocolError::Malformed(
                "binary frames are not supported".to_string(),
            )),
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by axum
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "WebSocket receive failed");
                break;
            }
        };
        if let Err(e) = result {
            tracing::info!(%connection_id, error = %e, "Closing connection on protocol error");
            break;
        }
    }

    session.close();
    if let Err(e) = writer.await {
        tracing::warn!(%connection_id, error = %e, "WebSocket writer failed");
    }
}
