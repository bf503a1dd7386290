//! In-memory `ChatRepository` used by tests and by `serve --ephemeral`.
//!
//! Cloning shares the same underlying map. Writes can be made to fail on
//! demand to exercise persistence-error paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use livedesk_types::chat::{AgentRef, ChatEntry, ChatSession, EndReason, SessionStatus};
use livedesk_types::error::RepositoryError;
use livedesk_types::identity::{ConnectionId, UserRef};
use uuid::Uuid;

use super::repository::ChatRepository;

#[derive(Clone, Default)]
pub struct InMemoryChatRepository {
    sessions: Arc<DashMap<Uuid, ChatSession>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write return `RepositoryError::Connection`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored sessions in the given status.
    pub fn count_with_status(&self, status: SessionStatus) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().status == status)
            .count()
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }
}

impl ChatRepository for InMemoryChatRepository {
    async fn create_session(&self, session: &ChatSession) -> Result<ChatSession, RepositoryError> {
        self.check_writable()?;
        if self.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        self.sessions.insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<ChatSession>, RepositoryError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn find_by_visitor_and_status(
        &self,
        visitor: &UserRef,
        status: SessionStatus,
    ) -> Result<Option<ChatSession>, RepositoryError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.visitor.identity == *visitor && s.status == status)
            .max_by_key(|s| s.created_at)
            .map(|s| s.value().clone()))
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ChatSession>, RepositoryError> {
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .iter()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));

        let offset = offset.unwrap_or(0).max(0) as usize;
        let limit = limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    async fn update_visitor_connection(
        &self,
        session_id: &Uuid,
        connection_id: &ConnectionId,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(RepositoryError::NotFound)?;
        session.visitor.connection_id = *connection_id;
        session.updated_at = updated_at;
        Ok(())
    }

    async fn assign_agent(
        &self,
        session_id: &Uuid,
        agent: &AgentRef,
        join_entry: &ChatEntry,
    ) -> Result<bool, RepositoryError> {
        self.check_writable()?;
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(RepositoryError::NotFound)?;
        if session.status != SessionStatus::Waiting || session.agent.is_some() {
            return Ok(false);
        }
        session.agent = Some(agent.clone());
        session.status = SessionStatus::Active;
        session.transcript.push(join_entry.clone());
        session.updated_at = join_entry.timestamp;
        Ok(true)
    }

    async fn append_entry(&self, session_id: &Uuid, entry: &ChatEntry) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(RepositoryError::NotFound)?;
        session.transcript.push(entry.clone());
        session.updated_at = entry.timestamp;
        Ok(())
    }

    async fn update_status(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        reason: Option<EndReason>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or(RepositoryError::NotFound)?;
        session.status = status;
        session.closed_reason = reason;
        session.updated_at = updated_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting(visitor: &str) -> ChatSession {
        ChatSession::new_waiting(UserRef::new(visitor), ConnectionId::new(), Vec::new())
    }

    fn agent() -> AgentRef {
        AgentRef {
            identity: UserRef::new("a1"),
            connection_id: ConnectionId::new(),
            display_name: "Bob".to_string(),
        }
    }

    #[tokio::test]
    async fn test_conditional_assign_only_once() {
        let repo = InMemoryChatRepository::new();
        let session = repo.create_session(&waiting("u1")).await.unwrap();
        let entry = ChatEntry::system("joined");

        assert!(repo.assign_agent(&session.id, &agent(), &entry).await.unwrap());
        assert!(!repo.assign_agent(&session.id, &agent(), &entry).await.unwrap());

        let stored = repo.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_visitor_and_status() {
        let repo = InMemoryChatRepository::new();
        let session = repo.create_session(&waiting("u1")).await.unwrap();
        repo.create_session(&waiting("u2")).await.unwrap();

        let found = repo
            .find_by_visitor_and_status(&UserRef::new("u1"), SessionStatus::Waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, session.id);

        let none = repo
            .find_by_visitor_and_status(&UserRef::new("u1"), SessionStatus::Active)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_fail_writes_leaves_reads_working() {
        let repo = InMemoryChatRepository::new();
        let session = repo.create_session(&waiting("u1")).await.unwrap();
        repo.set_fail_writes(true);

        let err = repo
            .append_entry(&session.id, &ChatEntry::system("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Connection));
        assert!(repo.get_session(&session.id).await.unwrap().is_some());

        repo.set_fail_writes(false);
        repo.append_entry(&session.id, &ChatEntry::system("x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_sessions_filters_and_pages() {
        let repo = InMemoryChatRepository::new();
        for i in 0..3 {
            repo.create_session(&waiting(&format!("u{i}"))).await.unwrap();
        }
        let closed = repo.create_session(&waiting("u9")).await.unwrap();
        repo.update_status(
            &closed.id,
            SessionStatus::Closed,
            Some(EndReason::Expired),
            Utc::now(),
        )
        .await
        .unwrap();

        let waiting_only = repo
            .list_sessions(Some(SessionStatus::Waiting), None, None)
            .await
            .unwrap();
        assert_eq!(waiting_only.len(), 3);

        let page = repo.list_sessions(None, Some(2), Some(1)).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(repo.count_with_status(SessionStatus::Closed), 1);
    }
}
