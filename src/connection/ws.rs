//! Worker WebSocket endpoint.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tracing::{debug, info, warn};

use super::protocol::{ConnectionSession, WorkerConnection};
use crate::bridge::Bridge;

pub async fn ws_handler(ws: WebSocketUpgrade, State(bridge): State<Arc<Bridge>>) -> impl IntoResponse {
    debug!("Worker connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, bridge))
}

/// Drive one worker connection until either side closes it.
///
/// Outbound messages arrive on the connection's channel. When the registry
/// drops the last handle (eviction, replacement, shutdown) the channel
/// closes and so does the socket.
async fn handle_socket(mut socket: WebSocket, bridge: Arc<Bridge>) {
    let (handle, mut outbound) = WorkerConnection::new();
    let mut session = ConnectionSession::new(handle);
    let connection_id = session.id;
    info!(connection_id = %connection_id, "Worker connection opened");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                match message {
                    Some(message) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(connection_id = %connection_id, error = %e, "Failed to encode message");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            debug!(connection_id = %connection_id, "Worker disconnected during send");
                            break;
                        }
                    }
                    None => {
                        debug!(connection_id = %connection_id, "Connection released by bridge");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        bridge.handle_frame(&mut session, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    bridge.connection_closed(connection_id).await;
    info!(connection_id = %connection_id, "Worker connection closed");
}
