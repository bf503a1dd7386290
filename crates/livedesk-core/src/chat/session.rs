//! State machine for a single live chat session.
//!
//! Wraps a `ChatSession` and owns every transition of its lifecycle:
//! `waiting -> active -> closed`, with `closed` reachable from both live
//! states. Transcript entries are only ever appended.

use chrono::Utc;
use livedesk_types::chat::{AgentRef, ChatEntry, ChatSession, EndReason, SenderKind, SessionStatus};
use livedesk_types::identity::{ConnectionId, ConnectionRole};
use thiserror::Error;

/// System line shown to the visitor when a waiting request expires unanswered.
pub const EXPIRED_NOTICE: &str = "No agent was available. This chat request has expired.";

/// System line recorded for sessions cut short by a restart.
pub const RESTART_NOTICE: &str = "This chat was interrupted by a server restart.";

/// Greeting appended when an agent joins.
pub fn join_notice(agent_name: &str) -> String {
    format!("Hi! You are now connected with {agent_name}.")
}

/// Line appended when one side drops its connection mid-chat.
pub fn disconnect_notice(role: ConnectionRole) -> String {
    format!("The {role} has disconnected. This chat has ended.")
}

/// A transition that the current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("session is {0}, expected waiting")]
    NotWaiting(SessionStatus),

    #[error("session already has an agent")]
    AlreadyAssigned,

    #[error("session is {0}, expected active")]
    NotActive(SessionStatus),

    #[error("session is already closed")]
    AlreadyClosed,
}

/// Manages the lifecycle and transcript of a single live chat session.
#[derive(Debug, Clone)]
pub struct LiveSession {
    session: ChatSession,
}

impl LiveSession {
    pub fn new(session: ChatSession) -> Self {
        Self { session }
    }

    /// Access the underlying chat session.
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn into_session(self) -> ChatSession {
        self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    /// Point the visitor side at a new connection (reload before assignment).
    pub fn resume(&mut self, connection_id: ConnectionId) -> Result<(), TransitionError> {
        if self.session.status != SessionStatus::Waiting {
            return Err(TransitionError::NotWaiting(self.session.status));
        }
        self.session.visitor.connection_id = connection_id;
        self.session.updated_at = Utc::now();
        Ok(())
    }

    /// Move `waiting -> active` with the given agent and append the greeting.
    ///
    /// The precondition check and the mutation happen in this one call, so a
    /// second caller observes the session as already assigned.
    pub fn assign(&mut self, agent: AgentRef) -> Result<ChatEntry, TransitionError> {
        if self.session.agent.is_some() {
            return Err(TransitionError::AlreadyAssigned);
        }
        if self.session.status != SessionStatus::Waiting {
            return Err(TransitionError::NotWaiting(self.session.status));
        }

        let entry = ChatEntry::system(join_notice(&agent.display_name));
        self.session.agent = Some(agent);
        self.session.status = SessionStatus::Active;
        self.push(entry.clone());
        Ok(entry)
    }

    /// Append a participant message. Only active sessions accept messages.
    pub fn post(&mut self, sender: SenderKind, text: &str) -> Result<ChatEntry, TransitionError> {
        if self.session.status != SessionStatus::Active {
            return Err(TransitionError::NotActive(self.session.status));
        }
        let entry = ChatEntry::new(sender, text);
        self.push(entry.clone());
        Ok(entry)
    }

    /// Append a system line to a live session.
    pub fn note(&mut self, text: impl Into<String>) -> Result<ChatEntry, TransitionError> {
        if !self.session.status.is_live() {
            return Err(TransitionError::AlreadyClosed);
        }
        let entry = ChatEntry::system(text);
        self.push(entry.clone());
        Ok(entry)
    }

    /// Move to the terminal `closed` state.
    pub fn close(&mut self, reason: EndReason) -> Result<(), TransitionError> {
        if !self.session.status.is_live() {
            return Err(TransitionError::AlreadyClosed);
        }
        self.session.status = SessionStatus::Closed;
        self.session.closed_reason = Some(reason);
        self.session.updated_at = Utc::now();
        Ok(())
    }

    fn push(&mut self, entry: ChatEntry) {
        self.session.updated_at = entry.timestamp;
        self.session.transcript.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedesk_types::identity::UserRef;

    fn waiting() -> LiveSession {
        LiveSession::new(ChatSession::new_waiting(
            UserRef::new("u1"),
            ConnectionId::new(),
            Vec::new(),
        ))
    }

    fn bob() -> AgentRef {
        AgentRef {
            identity: UserRef::new("a-bob"),
            connection_id: ConnectionId::new(),
            display_name: "Bob".to_string(),
        }
    }

    #[test]
    fn test_assign_moves_to_active_with_greeting() {
        let mut live = waiting();
        let entry = live.assign(bob()).unwrap();

        assert_eq!(live.status(), SessionStatus::Active);
        assert_eq!(entry.sender_kind, SenderKind::System);
        assert_eq!(entry.text, "Hi! You are now connected with Bob.");
        assert_eq!(live.session().transcript, vec![entry]);
        assert!(live.session().agent_connection_id().is_some());
    }

    #[test]
    fn test_second_assign_is_rejected_without_mutation() {
        let mut live = waiting();
        let first = bob();
        let winner = first.connection_id;
        live.assign(first).unwrap();
        let before = live.session().clone();

        let err = live.assign(bob()).unwrap_err();
        assert_eq!(err, TransitionError::AlreadyAssigned);
        assert_eq!(live.session(), &before);
        assert_eq!(live.session().agent_connection_id(), Some(winner));
    }

    #[test]
    fn test_post_requires_active() {
        let mut live = waiting();
        assert_eq!(
            live.post(SenderKind::Visitor, "hello?"),
            Err(TransitionError::NotActive(SessionStatus::Waiting))
        );
        assert!(live.session().transcript.is_empty());

        live.assign(bob()).unwrap();
        live.post(SenderKind::Visitor, "Hello").unwrap();
        assert_eq!(live.session().transcript.len(), 2);

        live.close(EndReason::EndedByVisitor).unwrap();
        assert_eq!(
            live.post(SenderKind::Agent, "still there?"),
            Err(TransitionError::NotActive(SessionStatus::Closed))
        );
        assert_eq!(live.session().transcript.len(), 2);
    }

    #[test]
    fn test_transcript_is_prefix_over_time() {
        let mut live = waiting();
        let mut observed: Vec<Vec<ChatEntry>> = vec![live.session().transcript.clone()];

        live.assign(bob()).unwrap();
        observed.push(live.session().transcript.clone());
        for text in ["Hello", "Hi, how can I help?", "My invoice is wrong"] {
            live.post(SenderKind::Visitor, text).unwrap();
            observed.push(live.session().transcript.clone());
        }
        live.note(disconnect_notice(ConnectionRole::Agent)).unwrap();
        live.close(EndReason::AgentDisconnected).unwrap();
        observed.push(live.session().transcript.clone());

        for pair in observed.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[test]
    fn test_resume_only_while_waiting() {
        let mut live = waiting();
        let new_conn = ConnectionId::new();
        live.resume(new_conn).unwrap();
        assert_eq!(live.session().visitor.connection_id, new_conn);

        live.assign(bob()).unwrap();
        assert_eq!(
            live.resume(ConnectionId::new()),
            Err(TransitionError::NotWaiting(SessionStatus::Active))
        );
    }

    #[test]
    fn test_close_is_terminal() {
        let mut live = waiting();
        live.close(EndReason::Expired).unwrap();
        assert_eq!(live.status(), SessionStatus::Closed);
        assert_eq!(live.session().closed_reason, Some(EndReason::Expired));
        assert_eq!(live.close(EndReason::EndedByAgent), Err(TransitionError::AlreadyClosed));
        assert_eq!(live.assign(bob()), Err(TransitionError::NotWaiting(SessionStatus::Closed)));
        assert!(live.note("late").is_err());
    }

    #[test]
    fn test_disconnect_notice_names_role() {
        assert_eq!(
            disconnect_notice(ConnectionRole::Agent),
            "The agent has disconnected. This chat has ended."
        );
        assert!(disconnect_notice(ConnectionRole::Visitor).starts_with("The visitor"));
    }
}
