//! Wire events for the live chat channel.
//!
//! Every frame on the channel is a JSON object tagged by `"type"`.
//! `ClientEvent` is what visitors and agents send; `ServerEvent` is what the
//! coordinator pushes back. Each variant has a fixed shape, and inbound events
//! are validated with [`ClientEvent::validate`] before they reach any state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{ChatEntry, EndReason, PriorEntry, SessionSnapshot};
use crate::error::ValidationError;
use crate::identity::UserRef;

/// Maximum accepted length of a chat message, in bytes.
pub const MAX_MESSAGE_LEN: usize = 8 * 1024;

/// Events sent by a client over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Start a new chat or resume the visitor's waiting one.
    RequestChat {
        visitor_identity: UserRef,
        #[serde(default)]
        prior_history: Vec<PriorEntry>,
    },
    /// Agent attempts to take a waiting session.
    AgentJoinSession {
        session_id: Uuid,
        agent_identity: UserRef,
    },
    PostMessage { session_id: Uuid, text: String },
    TypingStart { session_id: Uuid },
    TypingStop { session_id: Uuid },
    EndChat { session_id: Uuid },
    /// Agent asks for the full list of waiting sessions.
    ListWaiting,
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

impl ClientEvent {
    /// Event name as it appears in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RequestChat { .. } => "requestChat",
            ClientEvent::AgentJoinSession { .. } => "agentJoinSession",
            ClientEvent::PostMessage { .. } => "postMessage",
            ClientEvent::TypingStart { .. } => "typingStart",
            ClientEvent::TypingStop { .. } => "typingStop",
            ClientEvent::EndChat { .. } => "endChat",
            ClientEvent::ListWaiting => "listWaiting",
            ClientEvent::Ping => "ping",
        }
    }

    /// The session this event addresses, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ClientEvent::AgentJoinSession { session_id, .. }
            | ClientEvent::PostMessage { session_id, .. }
            | ClientEvent::TypingStart { session_id }
            | ClientEvent::TypingStop { session_id }
            | ClientEvent::EndChat { session_id } => Some(*session_id),

            ClientEvent::RequestChat { .. } | ClientEvent::ListWaiting | ClientEvent::Ping => {
                None
            }
        }
    }

    /// Reject malformed input before any state lookup.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(session_id) = self.session_id() {
            if session_id.is_nil() {
                return Err(ValidationError::MissingSessionId);
            }
        }

        match self {
            ClientEvent::RequestChat {
                visitor_identity,
                prior_history,
            } => {
                if visitor_identity.is_blank() {
                    return Err(ValidationError::EmptyIdentity);
                }
                if prior_history.iter().any(|e| e.text.len() > MAX_MESSAGE_LEN) {
                    return Err(ValidationError::MessageTooLong(MAX_MESSAGE_LEN));
                }
            }
            ClientEvent::AgentJoinSession { agent_identity, .. } => {
                if agent_identity.is_blank() {
                    return Err(ValidationError::EmptyIdentity);
                }
            }
            ClientEvent::PostMessage { text, .. } => {
                if text.trim().is_empty() {
                    return Err(ValidationError::EmptyMessage);
                }
                if text.len() > MAX_MESSAGE_LEN {
                    return Err(ValidationError::MessageTooLong(MAX_MESSAGE_LEN));
                }
            }
            ClientEvent::TypingStart { .. }
            | ClientEvent::TypingStop { .. }
            | ClientEvent::EndChat { .. }
            | ClientEvent::ListWaiting
            | ClientEvent::Ping => {}
        }

        Ok(())
    }
}

/// Why an assignment attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnavailableReason {
    /// The session does not exist or is no longer waiting.
    SessionNoLongerAvailable,
    /// Another agent joined first.
    AlreadyAssigned,
}

/// Events pushed by the server to one or more connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Acknowledges `requestChat` with the current session state.
    ChatRequested { session: SessionSnapshot },
    /// A session was created or resumed and is waiting for an agent.
    NewWaitingRequest { session: SessionSnapshot },
    /// The requesting agent won the session; carries the full transcript.
    SessionAssigned { session: SessionSnapshot },
    SessionUnavailable {
        session_id: Uuid,
        reason: UnavailableReason,
    },
    /// Tells the visitor an agent joined.
    AgentJoinedNotice { session_id: Uuid, entry: ChatEntry },
    /// Another agent took the session; remove it from pending lists.
    SessionTaken { session_id: Uuid, agent_name: String },
    MessageReceived { session_id: Uuid, entry: ChatEntry },
    TypingStart { session_id: Uuid },
    TypingStop { session_id: Uuid },
    SessionEnded {
        session_id: Uuid,
        reason: EndReason,
    },
    /// The session left every agent's pending list.
    SessionClosed { session_id: Uuid },
    WaitingSessions { sessions: Vec<SessionSnapshot> },
    Error { code: String, message: String },
    Pong,
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Returns the session_id from variants that carry one.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::ChatRequested { session }
            | ServerEvent::NewWaitingRequest { session }
            | ServerEvent::SessionAssigned { session } => Some(session.id),

            ServerEvent::SessionUnavailable { session_id, .. }
            | ServerEvent::AgentJoinedNotice { session_id, .. }
            | ServerEvent::SessionTaken { session_id, .. }
            | ServerEvent::MessageReceived { session_id, .. }
            | ServerEvent::TypingStart { session_id }
            | ServerEvent::TypingStop { session_id }
            | ServerEvent::SessionEnded { session_id, .. }
            | ServerEvent::SessionClosed { session_id } => Some(*session_id),

            ServerEvent::WaitingSessions { .. } | ServerEvent::Error { .. } | ServerEvent::Pong => {
                None
            }
        }
    }
}
