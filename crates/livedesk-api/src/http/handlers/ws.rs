//! WebSocket handler for the live chat channel.
//!
//! The `/ws/chat?role=visitor|agent&user=<id>` endpoint upgrades an HTTP
//! connection to a WebSocket. Once connected, the handler:
//!
//! - **Forwards events:** Registers the connection with the coordinator and
//!   pushes every [`ServerEvent`] from its queue to the client as a JSON text
//!   frame.
//! - **Receives events:** Parses incoming text frames as [`ClientEvent`] and
//!   queues them on the coordinator. Malformed frames are answered with an
//!   `error` event and never reach the coordinator.
//!
//! Closing the socket, or any transport error, reports a disconnect to the
//! coordinator, which ends an active session on the peer's behalf.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use livedesk_types::error::{CoordinatorError, ValidationError};
use livedesk_types::event::{ClientEvent, ServerEvent};
use livedesk_types::identity::{ConnectionId, ConnectionRole, UserRef};

use crate::http::error::AppError;
use crate::state::ServerState;

/// Query parameters identifying the peer behind a socket.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub role: ConnectionRole,
    pub user: String,
}

/// Upgrade an HTTP request to a live chat connection.
///
/// This is mounted at `/ws/chat` in the router.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, AppError> {
    let identity = UserRef::new(params.user.trim());
    if identity.is_blank() {
        return Err(AppError::Validation("user must not be empty".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, params.role, identity)))
}

/// Core WebSocket connection handler.
///
/// Uses `tokio::select!` to multiplex between the connection's outbound
/// queue and incoming WebSocket frames, keeping both halves in one task.
async fn handle_ws_connection(
    socket: WebSocket,
    state: ServerState,
    role: ConnectionRole,
    identity: UserRef,
) {
    let connection_id = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut event_rx = match state
        .coordinator
        .connect(connection_id, role, identity.clone())
        .await
    {
        Ok(rx) => rx,
        Err(err) => {
            tracing::warn!(%connection_id, error = %err, "coordinator refused connection");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::debug!(%connection_id, %role, user = %identity, "WebSocket connection opened");

    loop {
        tokio::select! {
            // --- Branch 1: Forward coordinator events to the client ---
            event = event_rx.recv() => {
                let Some(event) = event else {
                    // Router dropped the queue (unregistered or shutting down)
                    break;
                };
                if send_event(&mut ws_sender, &event).await.is_err() {
                    break;
                }
            }

            // --- Branch 2: Queue client events on the coordinator ---
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Err(err) = state.coordinator.send_event(connection_id, event).await {
                                    tracing::warn!(%connection_id, error = %err, "coordinator unavailable");
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(%connection_id, error = %err, "malformed frame");
                                let reply = malformed_reply(&err);
                                if send_event(&mut ws_sender, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%connection_id, "WebSocket receive error: {err}");
                        break;
                    }
                    // Binary, ping and pong frames are handled by axum/tungstenite
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if let Err(err) = state.coordinator.disconnect(connection_id).await {
        tracing::debug!(%connection_id, error = %err, "disconnect not delivered");
    }
    tracing::debug!(%connection_id, "WebSocket connection closed");
}

/// The `error` event sent back for a frame that is not a valid `ClientEvent`.
fn malformed_reply(err: &serde_json::Error) -> ServerEvent {
    let err = CoordinatorError::from(ValidationError::Malformed(err.to_string()));
    ServerEvent::error(err.code(), err.to_string())
}

/// Serialize an event and write it as a text frame.
async fn send_event(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => ws_sender.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::warn!("Failed to serialize ServerEvent: {err}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_params_parse_role() {
        let params: WsParams =
            serde_json::from_value(serde_json::json!({"role": "agent", "user": "a-bob"})).unwrap();
        assert_eq!(params.role, ConnectionRole::Agent);
        assert_eq!(params.user, "a-bob");

        let bad = serde_json::from_value::<WsParams>(serde_json::json!({"role": "admin", "user": "x"}));
        assert!(bad.is_err());
    }

    #[test]
    fn malformed_frame_reply_is_validation_error() {
        let err = serde_json::from_str::<ClientEvent>(r#"{"type":"postMessage"}"#).unwrap_err();
        match malformed_reply(&err) {
            ServerEvent::Error { code, message } => {
                assert_eq!(code, "VALIDATION_ERROR");
                assert!(message.contains("malformed event"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
