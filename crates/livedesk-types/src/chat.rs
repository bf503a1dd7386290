//! Live chat session, transcript entry, and snapshot types for Livedesk.
//!
//! A `ChatSession` is one support conversation between one visitor and at
//! most one agent. Its transcript is append-only. `SessionSnapshot` is the
//! client-facing view of a session and never carries connection ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::identity::{ConnectionId, ConnectionRole, UserRef};

/// Lifecycle status of a live chat session.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('waiting', 'active', 'closed'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Closed,
}

impl SessionStatus {
    /// Whether the session can still receive real-time events.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionStatus::Closed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Waiting
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    Visitor,
    Agent,
    System,
}

impl From<ConnectionRole> for SenderKind {
    fn from(role: ConnectionRole) -> Self {
        match role {
            ConnectionRole::Visitor => SenderKind::Visitor,
            ConnectionRole::Agent => SenderKind::Agent,
        }
    }
}

impl fmt::Display for SenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderKind::Visitor => write!(f, "visitor"),
            SenderKind::Agent => write!(f, "agent"),
            SenderKind::System => write!(f, "system"),
        }
    }
}

impl FromStr for SenderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "visitor" => Ok(SenderKind::Visitor),
            "agent" => Ok(SenderKind::Agent),
            "system" => Ok(SenderKind::System),
            other => Err(format!("invalid sender kind: '{other}'")),
        }
    }
}

/// Why a session reached `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    EndedByVisitor,
    EndedByAgent,
    VisitorDisconnected,
    AgentDisconnected,
    Expired,
    ServerRestart,
}

impl EndReason {
    /// Reason for an explicit end-chat by the given side.
    pub fn ended_by(role: ConnectionRole) -> Self {
        match role {
            ConnectionRole::Visitor => EndReason::EndedByVisitor,
            ConnectionRole::Agent => EndReason::EndedByAgent,
        }
    }

    /// Reason for a teardown caused by the given side dropping its connection.
    pub fn disconnected(role: ConnectionRole) -> Self {
        match role {
            ConnectionRole::Visitor => EndReason::VisitorDisconnected,
            ConnectionRole::Agent => EndReason::AgentDisconnected,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::EndedByVisitor => "ended_by_visitor",
            EndReason::EndedByAgent => "ended_by_agent",
            EndReason::VisitorDisconnected => "visitor_disconnected",
            EndReason::AgentDisconnected => "agent_disconnected",
            EndReason::Expired => "expired",
            EndReason::ServerRestart => "server_restart",
        };
        f.write_str(s)
    }
}

impl FromStr for EndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ended_by_visitor" => Ok(EndReason::EndedByVisitor),
            "ended_by_agent" => Ok(EndReason::EndedByAgent),
            "visitor_disconnected" => Ok(EndReason::VisitorDisconnected),
            "agent_disconnected" => Ok(EndReason::AgentDisconnected),
            "expired" => Ok(EndReason::Expired),
            "server_restart" => Ok(EndReason::ServerRestart),
            other => Err(format!("invalid end reason: '{other}'")),
        }
    }
}

/// A single immutable line of a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: Uuid,
    pub sender_kind: SenderKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(sender_kind: SenderKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender_kind,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SenderKind::System, text)
    }
}

/// A line of earlier chatbot conversation handed over with a chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorEntry {
    pub sender_kind: SenderKind,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriorEntry {
    /// Convert into a transcript entry, stamping `now` when no time was given.
    pub fn into_entry(self) -> ChatEntry {
        ChatEntry {
            id: Uuid::now_v7(),
            sender_kind: self.sender_kind,
            text: self.text,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// The visitor side of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorRef {
    pub identity: UserRef,
    /// Current transport connection; replaced on reconnect.
    pub connection_id: ConnectionId,
}

/// The agent side of a session, present once an agent has joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub identity: UserRef,
    pub connection_id: ConnectionId,
    /// Name shown to the visitor, resolved from the user directory on join.
    pub display_name: String,
}

/// A live chat session between a visitor and at most one agent.
///
/// `agent` is `Some` exactly when `status != Waiting` and the session was
/// assigned before closing; a waiting session closed by expiry never gets one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub visitor: VisitorRef,
    pub agent: Option<AgentRef>,
    pub status: SessionStatus,
    pub transcript: Vec<ChatEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_reason: Option<EndReason>,
}

impl ChatSession {
    /// Create a waiting session for a visitor, seeded with earlier history.
    pub fn new_waiting(
        visitor: UserRef,
        connection_id: ConnectionId,
        prior_history: Vec<ChatEntry>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            visitor: VisitorRef {
                identity: visitor,
                connection_id,
            },
            agent: None,
            status: SessionStatus::Waiting,
            transcript: prior_history,
            created_at: now,
            updated_at: now,
            closed_reason: None,
        }
    }

    /// The agent's current connection, if one has joined.
    pub fn agent_connection_id(&self) -> Option<ConnectionId> {
        self.agent.as_ref().map(|a| a.connection_id)
    }

    /// Which side the given connection is on, if it is a participant.
    pub fn role_of(&self, connection_id: ConnectionId) -> Option<ConnectionRole> {
        if self.visitor.connection_id == connection_id {
            Some(ConnectionRole::Visitor)
        } else if self.agent_connection_id() == Some(connection_id) {
            Some(ConnectionRole::Agent)
        } else {
            None
        }
    }

    /// Every connection currently attached to the session.
    pub fn participant_connections(&self) -> Vec<ConnectionId> {
        let mut conns = vec![self.visitor.connection_id];
        conns.extend(self.agent_connection_id());
        conns
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(self)
    }
}

/// Client-facing view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub visitor: UserRef,
    pub agent: Option<UserRef>,
    pub agent_name: Option<String>,
    pub status: SessionStatus,
    pub transcript: Vec<ChatEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<EndReason>,
}

impl From<&ChatSession> for SessionSnapshot {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id,
            visitor: session.visitor.identity.clone(),
            agent: session.agent.as_ref().map(|a| a.identity.clone()),
            agent_name: session.agent.as_ref().map(|a| a.display_name.clone()),
            status: session.status,
            transcript: session.transcript.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            closed_reason: session.closed_reason,
        }
    }
}
