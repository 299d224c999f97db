// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use typerace_common::{ClientMessage, ServerMessage};

use crate::error::AppError;
use crate::socket::SocketHandler;
use crate::store::Store;
use crate::AppState;

/// Create the WebSocket router
pub fn create_router<S: Store + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for WebSocket connection upgrades
pub async fn ws_handler<S: Store + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection<S: Store + 'static>(socket: WebSocket, state: Arc<AppState<S>>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // All outbound traffic for this connection goes through one channel:
    // direct replies from the dispatcher plus room broadcasts, which the
    // room registry pushes in after `join_room` registers this sender.
    let (server_tx, mut server_rx) = mpsc::channel::<ServerMessage>(32);

    let mut handler = SocketHandler::new(state, server_tx.clone());
    let session_id = handler.session_id();

    // Forward task: serialize ServerMessages onto the wire.
    let send_task = tokio::spawn(async move {
        while let Some(server_msg) = server_rx.recv().await {
            let json = match serde_json::to_string(&server_msg) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(%err, "failed to serialize outbound message");
                    continue;
                },
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Main loop: parse and dispatch incoming frames.
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                let outcome = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => handler.handle_message(client_msg).await,
                    Err(err) => Err(AppError::InvalidFormat(err.to_string())),
                };
                let reply = match outcome {
                    Ok(reply) => reply,
                    Err(err) => {
                        tracing::debug!(%session_id, code = ?err.code(), "rejected message");
                        Some(err.to_server_message())
                    },
                };
                if let Some(reply) = reply {
                    if server_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            // Ping/pong are handled by axum; ignore binary frames.
            _ => {},
        }
    }

    handler.handle_disconnect();

    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);

    send_task.abort();
}
