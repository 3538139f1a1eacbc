// =============================================================================
// WebSocket Handler — Push-based state updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate full DashboardSnapshot on connect.
//   2. A new snapshot every 500 ms whenever the state version has changed
//      since the last push.
//   3. A `refresh_failed` message for every failed symbol refresh, as it
//      happens.
//
// Ping frames are answered with Pong; text frames are ignored.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::{AppState, DashboardSnapshot};
use crate::state_store::{Notification, StoreEvent};

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Outbound message envelope.
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum Outbound<'a> {
    Snapshot(&'a DashboardSnapshot),
    RefreshFailed(&'a Notification),
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// One `tokio::select!` loop multiplexes the version poll, store events and
/// incoming client frames.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.store.subscribe();
    let mut sequence: u64 = 0;

    let mut last_sent_version = state.current_state_version();
    if let Err(e) = send_snapshot(&mut sender, &state, &mut sequence).await {
        warn!(error = %e, "Failed to send initial WebSocket snapshot");
        return;
    }

    let mut push_interval = interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            // ── Push loop: check for version changes every 500 ms ───────
            _ = push_interval.tick() => {
                let current_version = state.current_state_version();
                if current_version != last_sent_version {
                    if let Err(e) = send_snapshot(&mut sender, &state, &mut sequence).await {
                        debug!(error = %e, "WebSocket send failed — disconnecting");
                        break;
                    }
                    last_sent_version = current_version;
                }
            }

            // ── Store events: forward failures immediately ──────────────
            event = events.recv() => {
                match event {
                    Ok(StoreEvent::Failed(notification)) => {
                        let msg = Outbound::RefreshFailed(&notification);
                        if let Err(e) = send_json(&mut sender, &state, &msg, &mut sequence).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    // Updates are picked up by the version poll.
                    Ok(StoreEvent::Updated { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged behind store events");
                    }
                    Err(RecvError::Closed) => {
                        info!("Store event channel closed — disconnecting");
                        break;
                    }
                }
            }

            // ── Recv loop: process incoming messages ────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => {
                        debug!("WebSocket client message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended (None)");
                        break;
                    }
                }
            }
        }
    }

    info!(messages = sequence, "WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

async fn send_snapshot<S>(
    sender: &mut S,
    state: &AppState,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.build_snapshot();
    send_json(sender, state, &Outbound::Snapshot(&snapshot), sequence).await?;
    debug!(version = snapshot.state_version, seq = *sequence, "WebSocket snapshot sent");
    Ok(())
}

/// Serialize and send one message, bumping both sequence counters.
async fn send_json<S>(
    sender: &mut S,
    state: &AppState,
    msg: &Outbound<'_>,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            state.ws_sequence_number.fetch_add(1, Ordering::Relaxed);
            *sequence += 1;
            Ok(())
        }
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize WebSocket message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn failure_message_is_tagged() {
        let notification = Notification {
            symbol: "BTCUSDT".into(),
            message: "candles: timeout".into(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(Outbound::RefreshFailed(&notification)).unwrap();
        assert_eq!(json["type"], "refresh_failed");
        assert_eq!(json["data"]["symbol"], "BTCUSDT");
    }
}
