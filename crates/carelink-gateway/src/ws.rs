// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket handler for per-session push events.
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "snapshot", "session": { ... }}
//! {"type": "event", "event": {"event_type": "status", "status": "auth_completed", ...}}
//! ```
//!
//! Any client text frame is treated as a status request and answered with a
//! fresh snapshot. Delivery is lossy: with nobody connected, events are
//! dropped and polling GET /session/{id} remains the fallback path.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::debug;

use carelink_core::SessionView;
use carelink_core::types::SessionEvent;

use crate::handlers::ApiError;
use crate::server::GatewayState;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsOutgoing {
    Snapshot { session: SessionView },
    Event { event: SessionEvent },
}

fn frame(outgoing: &WsOutgoing) -> Message {
    // Serialization of these frames cannot fail.
    Message::Text(serde_json::to_string(outgoing).unwrap_or_default().into())
}

/// GET /session/{id}/stream
///
/// Rejects unknown sessions with 404 before upgrading; a successful
/// upgrade therefore always starts with a snapshot frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.machine.snapshot(&id).await?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, id, snapshot))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    session_id: String,
    snapshot: SessionView,
) {
    let (mut sender, mut receiver) = socket.split();

    if sender
        .send(frame(&WsOutgoing::Snapshot { session: snapshot }))
        .await
        .is_err()
    {
        return;
    }

    // Registering replaces any previous subscriber for this session.
    let mut subscription = state.machine.hub().subscribe(&session_id);
    debug!(session_id, "websocket subscriber connected");

    loop {
        tokio::select! {
            event = subscription.events.recv() => {
                let Some(event) = event else {
                    // Replaced by a newer connection.
                    debug!(session_id, "websocket subscriber replaced");
                    break;
                };
                if sender.send(frame(&WsOutgoing::Event { event })).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(_))) => {
                        // Status request: answer with a fresh snapshot.
                        match state.machine.snapshot(&session_id).await {
                            Ok(session) => {
                                if sender
                                    .send(frame(&WsOutgoing::Snapshot { session }))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(_) => break, // expired mid-connection
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {} // binary and pings ignored
                }
            }
        }
    }

    // Guarded removal: a connection may only deregister its own channel,
    // never a successor that re-subscribed during a reconnect race.
    state
        .machine
        .hub()
        .unsubscribe_own(&session_id, subscription.handle());
    debug!(session_id, "websocket subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::types::{EventType, SessionStatus};

    #[test]
    fn event_frame_serializes_with_type_tag() {
        let outgoing = WsOutgoing::Event {
            event: SessionEvent::now(EventType::Completed, SessionStatus::Completed, None),
        };
        let Message::Text(text) = frame(&outgoing) else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["event_type"], "completed");
        assert_eq!(value["event"]["status"], "completed");
    }
}
