//! ChatRepository trait definition.
//!
//! The session store port: persistence of live chat sessions and their
//! transcripts. Uses native async fn in traits (RPITIT, Rust 2024 edition).

use chrono::{DateTime, Utc};
use livedesk_types::chat::{AgentRef, ChatEntry, ChatSession, EndReason, SessionStatus};
use livedesk_types::error::RepositoryError;
use livedesk_types::identity::{ConnectionId, UserRef};
use uuid::Uuid;

/// Repository trait for live chat session persistence.
///
/// Implementations live in livedesk-infra (e.g., `SqliteChatRepository`) and
/// in [`crate::chat::memory`] for tests and ephemeral runs.
pub trait ChatRepository: Send + Sync {
    /// Insert a new session together with its seeded transcript.
    fn create_session(
        &self,
        session: &ChatSession,
    ) -> impl std::future::Future<Output = Result<ChatSession, RepositoryError>> + Send;

    /// Get a session (with transcript) by its unique ID.
    fn get_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ChatSession>, RepositoryError>> + Send;

    /// Find the visitor's session in the given status, newest first.
    fn find_by_visitor_and_status(
        &self,
        visitor: &UserRef,
        status: SessionStatus,
    ) -> impl std::future::Future<Output = Result<Option<ChatSession>, RepositoryError>> + Send;

    /// List sessions ordered by created_at ASC, optionally filtered by status.
    fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, RepositoryError>> + Send;

    /// Point the visitor side of a session at a new connection.
    fn update_visitor_connection(
        &self,
        session_id: &Uuid,
        connection_id: &ConnectionId,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically assign an agent and append the join entry.
    ///
    /// Succeeds only if the session is still `waiting` with no agent. Returns
    /// `Ok(false)` without writing anything when that condition does not hold.
    fn assign_agent(
        &self,
        session_id: &Uuid,
        agent: &AgentRef,
        join_entry: &ChatEntry,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Append one transcript entry and bump `updated_at` to its timestamp.
    fn append_entry(
        &self,
        session_id: &Uuid,
        entry: &ChatEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Change the status of a session, recording the close reason if any.
    fn update_status(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        reason: Option<EndReason>,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
