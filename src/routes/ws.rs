//! WebSocket handler — live availability channel.
//!
//! DESIGN
//! ======
//! On upgrade, the connection registers with the hub, which queues a
//! SNAPSHOT before the connection can receive any DELTA. The task then
//! enters a `select!` loop:
//! - Outbound queue from the hub → forward to client
//! - Incoming client text → HINT is logged and ignored, anything else is dropped
//! - Ping ticker → send ping, close if the peer has been silent too long
//!
//! Every socket write is bounded by the idle timeout. A peer that stops
//! reading fills the TCP window and the write stalls; the task then closes
//! instead of waiting on the kernel.
//!
//! Client messages never mutate the registry. Seat changes only happen
//! through the booking endpoints.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → hub registration (`Connecting`) → snapshot queued (`Open`)
//! 2. Hub closes the queue (slow consumer, shutdown) → `Closed`
//! 3. Client close, socket error, stalled write or idle timeout → deregister

use std::future::Future;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use wire::{ClientMessage, ServerMessage};

use crate::services::hub::ConnectionId;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(state.hub.queue_capacity());

    let conn_id = match state.hub.on_connect(&state.registry, client_tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "ws: registration failed");
            return;
        }
    };
    let conn_state = state.hub.state(conn_id).await;
    info!(%conn_id, state = ?conn_state, "ws: client connected");

    let idle_timeout = state.config.ws_idle_timeout;
    let mut last_seen = Instant::now();
    let mut ping = tokio::time::interval_at(Instant::now() + state.config.ws_ping_interval, state.config.ws_ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            outbound = client_rx.recv() => {
                let Some(message) = outbound else {
                    info!(%conn_id, "ws: queue closed by hub");
                    break;
                };
                if !send_within(conn_id, idle_timeout, send_message(&mut socket, &message)).await {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                last_seen = Instant::now();
                match msg {
                    Message::Text(text) => handle_inbound_text(conn_id, text.as_str()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = ping.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    info!(%conn_id, idle_secs = last_seen.elapsed().as_secs(), "ws: idle timeout");
                    break;
                }
                let frame = async { socket.send(Message::Ping(axum::body::Bytes::new())).await.map_err(|_| ()) };
                if !send_within(conn_id, idle_timeout, frame).await {
                    break;
                }
            }
        }
    }

    state.hub.on_disconnect(conn_id).await;
    info!(%conn_id, "ws: client disconnected");
}

// =============================================================================
// INBOUND
// =============================================================================

/// What an inbound text message amounts to. Neither variant changes state.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Hint { space_id: i64, available_seats: i32 },
    Malformed,
}

fn classify_inbound(text: &str) -> Inbound {
    match wire::decode_client_message(text) {
        Ok(ClientMessage::Hint { space_id, available_seats }) => Inbound::Hint { space_id, available_seats },
        Err(_) => Inbound::Malformed,
    }
}

fn handle_inbound_text(conn_id: ConnectionId, text: &str) {
    match classify_inbound(text) {
        Inbound::Hint { space_id, available_seats } => {
            debug!(%conn_id, space_id, available_seats, "ws: hint ignored");
        }
        Inbound::Malformed => {
            warn!(%conn_id, len = text.len(), "ws: malformed inbound message dropped");
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Await one socket write for at most `limit`. `false` means the connection is done.
async fn send_within(conn_id: ConnectionId, limit: Duration, send: impl Future<Output = Result<(), ()>>) -> bool {
    match tokio::time::timeout(limit, send).await {
        Ok(result) => result.is_ok(),
        Err(_) => {
            info!(%conn_id, limit_ms = limit.as_millis(), "ws: write stalled; closing");
            false
        }
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match wire::encode_message(message) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    debug!(version = message.version(), count = message.spaces().len(), "ws: send message");
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
