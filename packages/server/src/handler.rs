//! WebSocket and HTTP endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use kakehashi_shared::{
    protocol::{ClientEvent, ConnectionStatus, ServerEvent},
    time::now_epoch_millis,
};

use crate::{hub::ConnectionStats, state::AppState};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let connected_at = now_epoch_millis();

    // Create a channel for this connection to receive outbound frames
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.hub.register(connection_id, tx, connected_at).await;

    let (mut sender, mut receiver) = socket.split();

    // Tell the client it is connected before anything else
    let hello = ServerEvent::ConnectionStatus {
        status: ConnectionStatus::Connected,
        timestamp: connected_at,
        message: Some("Successfully connected to real-time server".to_string()),
    };
    match serde_json::to_string(&hello) {
        Ok(json) => {
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                tracing::error!("Failed to send connection status to {}: {}", connection_id, e);
                state.hub.unregister(&connection_id).await;
                return;
            }
        }
        Err(e) => {
            tracing::error!("Failed to serialize connection status: {}", e);
            state.hub.unregister(&connection_id).await;
            return;
        }
    }

    let hub = state.hub.clone();

    // Task receiving frames from this client
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(ClientEvent::Subscribe { rooms }) => {
                            hub.subscribe(&connection_id, &rooms).await;
                        }
                        Ok(ClientEvent::Unsubscribe { rooms }) => {
                            hub.unsubscribe(&connection_id, &rooms).await;
                        }
                        Ok(ClientEvent::Ping { timestamp }) => {
                            tracing::debug!(
                                "Ping from {} (client timestamp {})",
                                connection_id,
                                timestamp
                            );
                            let pong = ServerEvent::Pong {
                                timestamp: now_epoch_millis(),
                            };
                            hub.push_to(&connection_id, &pong).await;
                        }
                        // Malformed frames are logged and ignored; the
                        // connection stays open.
                        Err(e) => {
                            tracing::warn!(
                                "Ignoring malformed frame from {}: {} ({})",
                                connection_id,
                                e,
                                text
                            );
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::info!("Client {} requested close", connection_id);
                    break;
                }
                Message::Ping(_) => {
                    tracing::debug!("Received transport ping from {}", connection_id);
                    // Transport-level ping/pong is handled by the protocol layer
                }
                _ => {}
            }
        }
    });

    // Task forwarding hub frames to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    state.hub.unregister(&connection_id).await;
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Connection statistics endpoint (connected clients and per-room counts)
pub async fn get_connection_stats(State(state): State<Arc<AppState>>) -> Json<ConnectionStats> {
    Json(state.hub.connection_stats().await)
}
