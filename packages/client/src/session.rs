//! Transport session loop.
//!
//! One invocation of [`run_session_loop`] corresponds to one call to
//! [`crate::manager::RealtimeClient::connect`]: it dials the server, pumps
//! frames in both directions, and on connection loss retries with a growing
//! delay until the attempt budget is exhausted or shutdown is requested.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use kakehashi_shared::protocol::{ClientEvent, ConnectionStatus, ServerEvent};

use crate::{
    config::{ClientConfig, reconnect_delay},
    manager::ClientShared,
    store::RealtimeStore,
};

pub(crate) async fn run_session_loop(
    config: ClientConfig,
    shared: Arc<ClientShared>,
    store: Arc<RealtimeStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_async(&config.url).await {
            Ok((ws_stream, _response)) => {
                tracing::info!("WebSocket connected to {}", config.url);
                attempt = 0;

                let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

                // Re-enter the rooms the caller wants before anything else
                // goes over the wire
                let desired = shared.desired_rooms();
                if !desired.is_empty() {
                    tracing::info!("Resubscribing to rooms: {:?}", desired);
                    let _ = outbox_tx.send(ClientEvent::Subscribe { rooms: desired });
                }
                *shared.outbox.lock().expect("Outbox lock poisoned") = Some(outbox_tx);
                shared.set_status(&store, ConnectionStatus::Connected, 0);

                let shutdown_requested =
                    run_session(ws_stream, &shared, &store, outbox_rx, &mut shutdown).await;

                shared.outbox.lock().expect("Outbox lock poisoned").take();
                if shutdown_requested {
                    break;
                }
                tracing::warn!("WebSocket connection lost");
            }
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", config.url, e);
            }
        }

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            tracing::error!(
                "Giving up after {} reconnection attempts",
                config.max_reconnect_attempts
            );
            shared.set_status(&store, ConnectionStatus::Error, attempt - 1);
            break;
        }

        shared.set_status(&store, ConnectionStatus::Reconnecting, attempt);
        let delay = reconnect_delay(attempt, config.reconnect_delay, config.reconnect_delay_max);
        tracing::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt,
            config.max_reconnect_attempts
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Pump one live connection. Returns `true` when the session ended because
/// shutdown was requested, `false` on connection loss.
async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    shared: &ClientShared,
    store: &RealtimeStore,
    mut outbox_rx: mpsc::UnboundedReceiver<ClientEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_server_event(&text, shared, store);
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("Server closed the connection");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    return false;
                }
                None => return false,
            },
            event = outbox_rx.recv() => match event {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        tracing::warn!("Failed to send event: {}", e);
                        return false;
                    }
                }
                None => return false,
            },
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return true;
            }
        }
    }
}

/// Apply one inbound frame. Status echoes and pongs are informational; update
/// events flow into the store and out to observers. Unparseable frames are
/// logged and skipped.
fn handle_server_event(text: &str, shared: &ClientShared, store: &RealtimeStore) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::ConnectionStatus { status, message, .. }) => {
            tracing::debug!("Server reports status {} ({:?})", status, message);
            // The hello frame confirms what the transport already told us;
            // a repeated status is a no-op in set_status
            shared.set_status(store, status, store.reconnect_attempts());
        }
        Ok(ServerEvent::Pong { timestamp }) => {
            tracing::debug!("Pong (sent at {})", timestamp);
        }
        Ok(event) => {
            store.apply_update(&event);
            shared.notify_update(&event);
        }
        Err(e) => {
            tracing::warn!("Ignoring unparseable frame: {} ({})", e, text);
        }
    }
}
