//! Backend selection for the session store and user directory.
//!
//! `livedesk serve` runs on SQLite by default and on the in-memory adapters
//! with `--ephemeral`. These enums let the coordinator and the HTTP handlers
//! stay generic-free while either backend is plugged in at startup.

use chrono::{DateTime, Utc};
use livedesk_core::chat::memory::InMemoryChatRepository;
use livedesk_core::chat::repository::ChatRepository;
use livedesk_core::directory::{StaticUserDirectory, UserDirectory};
use livedesk_infra::sqlite::chat::SqliteChatRepository;
use livedesk_infra::sqlite::user::SqliteUserDirectory;
use livedesk_types::chat::{AgentRef, ChatEntry, ChatSession, EndReason, SessionStatus};
use livedesk_types::error::RepositoryError;
use livedesk_types::identity::{ConnectionId, UserRef};
use uuid::Uuid;

#[derive(Clone)]
pub enum SessionStore {
    Sqlite(SqliteChatRepository),
    Memory(InMemoryChatRepository),
}

impl SessionStore {
    pub fn backend_name(&self) -> &'static str {
        match self {
            SessionStore::Sqlite(_) => "sqlite",
            SessionStore::Memory(_) => "memory",
        }
    }
}

impl ChatRepository for SessionStore {
    async fn create_session(&self, session: &ChatSession) -> Result<ChatSession, RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => repo.create_session(session).await,
            SessionStore::Memory(repo) => repo.create_session(session).await,
        }
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<ChatSession>, RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => repo.get_session(session_id).await,
            SessionStore::Memory(repo) => repo.get_session(session_id).await,
        }
    }

    async fn find_by_visitor_and_status(
        &self,
        visitor: &UserRef,
        status: SessionStatus,
    ) -> Result<Option<ChatSession>, RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => repo.find_by_visitor_and_status(visitor, status).await,
            SessionStore::Memory(repo) => repo.find_by_visitor_and_status(visitor, status).await,
        }
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ChatSession>, RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => repo.list_sessions(status, limit, offset).await,
            SessionStore::Memory(repo) => repo.list_sessions(status, limit, offset).await,
        }
    }

    async fn update_visitor_connection(
        &self,
        session_id: &Uuid,
        connection_id: &ConnectionId,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => {
                repo.update_visitor_connection(session_id, connection_id, updated_at)
                    .await
            }
            SessionStore::Memory(repo) => {
                repo.update_visitor_connection(session_id, connection_id, updated_at)
                    .await
            }
        }
    }

    async fn assign_agent(
        &self,
        session_id: &Uuid,
        agent: &AgentRef,
        join_entry: &ChatEntry,
    ) -> Result<bool, RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => repo.assign_agent(session_id, agent, join_entry).await,
            SessionStore::Memory(repo) => repo.assign_agent(session_id, agent, join_entry).await,
        }
    }

    async fn append_entry(&self, session_id: &Uuid, entry: &ChatEntry) -> Result<(), RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => repo.append_entry(session_id, entry).await,
            SessionStore::Memory(repo) => repo.append_entry(session_id, entry).await,
        }
    }

    async fn update_status(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        reason: Option<EndReason>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match self {
            SessionStore::Sqlite(repo) => {
                repo.update_status(session_id, status, reason, updated_at).await
            }
            SessionStore::Memory(repo) => {
                repo.update_status(session_id, status, reason, updated_at).await
            }
        }
    }
}

#[derive(Clone)]
pub enum Directory {
    Sqlite(SqliteUserDirectory),
    Static(StaticUserDirectory),
}

impl UserDirectory for Directory {
    async fn display_name(&self, user: &UserRef) -> Result<Option<String>, RepositoryError> {
        match self {
            Directory::Sqlite(users) => users.display_name(user).await,
            Directory::Static(users) => users.display_name(user).await,
        }
    }
}
