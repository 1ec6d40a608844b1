//! WebSocket connection handler

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use super::events::{ClientMessage, PongMessage};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::realtime::{ChannelTransport, Subscriber};
use crate::utils::current_timestamp_ms;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if !state.tracker.broadcaster().enabled() {
        return ApiError::Unavailable("realtime streaming is disabled".to_string()).into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let broadcaster = state.tracker.broadcaster().clone();
    let (transport, mut rx) = ChannelTransport::channel();
    let Some(id) = broadcaster.subscribe(Subscriber::sendable(transport)) else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    tracing::debug!(subscriber = %id, "websocket connected");

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break; // Client disconnected
                        }
                    }
                    // Broadcaster dropped us (cleared or failed send)
                    None => break,
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if !handle_client_message(msg, &mut socket).await {
                            break;
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    broadcaster.unsubscribe(id);
    tracing::debug!(subscriber = %id, "websocket closed");
}

/// Handle a message from the client.
/// Returns false if the connection should be closed.
async fn handle_client_message(msg: Message, socket: &mut WebSocket) -> bool {
    match msg {
        Message::Text(text) => {
            if let Ok(ClientMessage::Ping) = serde_json::from_str::<ClientMessage>(&text) {
                if let Ok(json) = serde_json::to_string(&PongMessage::new(current_timestamp_ms())) {
                    let _ = socket.send(Message::Text(json)).await;
                }
            }
            true
        }
        Message::Binary(_) | Message::Pong(_) => true,
        Message::Ping(data) => socket.send(Message::Pong(data)).await.is_ok(),
        Message::Close(_) => false,
    }
}
