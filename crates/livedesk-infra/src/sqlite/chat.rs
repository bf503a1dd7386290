//! SQLite chat repository implementation.
//!
//! Implements `ChatRepository` from `livedesk-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reads on the reader
//! pool and every write on the single-connection writer.

use chrono::{DateTime, SecondsFormat, Utc};
use livedesk_core::chat::repository::ChatRepository;
use livedesk_types::chat::{
    AgentRef, ChatEntry, ChatSession, EndReason, SenderKind, SessionStatus, VisitorRef,
};
use livedesk_types::error::RepositoryError;
use livedesk_types::identity::{ConnectionId, UserRef};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ChatRepository`.
#[derive(Clone)]
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn load_entries(&self, session_id: &str) -> Result<Vec<ChatEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM chat_entries WHERE session_id = ? ORDER BY seq ASC")
            .bind(session_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry_row =
                ChatEntryRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            entries.push(entry_row.into_entry()?);
        }
        Ok(entries)
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ChatSession, RepositoryError> {
        let session_row =
            ChatSessionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let transcript = self.load_entries(&session_row.id).await?;
        session_row.into_session(transcript)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain ChatSession.
struct ChatSessionRow {
    id: String,
    visitor_identity: String,
    visitor_connection_id: String,
    agent_identity: Option<String>,
    agent_connection_id: Option<String>,
    agent_display_name: Option<String>,
    status: String,
    closed_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ChatSessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            visitor_identity: row.try_get("visitor_identity")?,
            visitor_connection_id: row.try_get("visitor_connection_id")?,
            agent_identity: row.try_get("agent_identity")?,
            agent_connection_id: row.try_get("agent_connection_id")?,
            agent_display_name: row.try_get("agent_display_name")?,
            status: row.try_get("status")?,
            closed_reason: row.try_get("closed_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self, transcript: Vec<ChatEntry>) -> Result<ChatSession, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid session id: {e}")))?;
        let visitor_connection_id: ConnectionId = self
            .visitor_connection_id
            .parse()
            .map_err(|e| RepositoryError::Query(format!("invalid visitor connection id: {e}")))?;
        let status: SessionStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let closed_reason = self
            .closed_reason
            .as_deref()
            .map(str::parse::<EndReason>)
            .transpose()
            .map_err(RepositoryError::Query)?;

        let agent = match (self.agent_identity, self.agent_connection_id) {
            (Some(identity), Some(connection_id)) => {
                let connection_id: ConnectionId = connection_id.parse().map_err(|e| {
                    RepositoryError::Query(format!("invalid agent connection id: {e}"))
                })?;
                Some(AgentRef {
                    display_name: self
                        .agent_display_name
                        .unwrap_or_else(|| identity.clone()),
                    identity: UserRef::new(identity),
                    connection_id,
                })
            }
            _ => None,
        };

        Ok(ChatSession {
            id,
            visitor: VisitorRef {
                identity: UserRef::new(self.visitor_identity),
                connection_id: visitor_connection_id,
            },
            agent,
            status,
            transcript,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            closed_reason,
        })
    }
}

/// Internal row type for mapping SQLite rows to domain ChatEntry.
struct ChatEntryRow {
    id: String,
    sender_kind: String,
    text: String,
    timestamp: String,
}

impl ChatEntryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            sender_kind: row.try_get("sender_kind")?,
            text: row.try_get("text")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_entry(self) -> Result<ChatEntry, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid entry id: {e}")))?;
        let sender_kind: SenderKind = self
            .sender_kind
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(ChatEntry {
            id,
            sender_kind,
            text: self.text,
            timestamp: parse_datetime(&self.timestamp)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn map_write_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e {
        let message = db_err.message();
        if message.contains("UNIQUE") || message.contains("PRIMARY KEY") {
            return RepositoryError::Conflict(message.to_string());
        }
        if message.contains("FOREIGN KEY") {
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::Query(e.to_string())
}

const INSERT_ENTRY: &str = r#"INSERT INTO chat_entries (id, session_id, seq, sender_kind, text, timestamp)
   VALUES (?, ?, (SELECT COALESCE(MAX(seq), -1) + 1 FROM chat_entries WHERE session_id = ?), ?, ?, ?)"#;

async fn insert_entry(
    conn: &mut sqlx::SqliteConnection,
    session_id: &str,
    entry: &ChatEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(INSERT_ENTRY)
        .bind(entry.id.to_string())
        .bind(session_id)
        .bind(session_id)
        .bind(entry.sender_kind.to_string())
        .bind(&entry.text)
        .bind(format_datetime(&entry.timestamp))
        .execute(conn)
        .await
        .map_err(map_write_error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    async fn create_session(&self, session: &ChatSession) -> Result<ChatSession, RepositoryError> {
        let id = session.id.to_string();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO chat_sessions (id, visitor_identity, visitor_connection_id, agent_identity,
                   agent_connection_id, agent_display_name, status, closed_reason, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(session.visitor.identity.as_str())
        .bind(session.visitor.connection_id.to_string())
        .bind(session.agent.as_ref().map(|a| a.identity.to_string()))
        .bind(session.agent.as_ref().map(|a| a.connection_id.to_string()))
        .bind(session.agent.as_ref().map(|a| a.display_name.clone()))
        .bind(session.status.to_string())
        .bind(session.closed_reason.map(|r| r.to_string()))
        .bind(format_datetime(&session.created_at))
        .bind(format_datetime(&session.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        for entry in &session.transcript {
            insert_entry(&mut tx, &id, entry).await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(session.clone())
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<ChatSession>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_visitor_and_status(
        &self,
        visitor: &UserRef,
        status: SessionStatus,
    ) -> Result<Option<ChatSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM chat_sessions WHERE visitor_identity = ? AND status = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(visitor.as_str())
        .bind(status.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ChatSession>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM chat_sessions");
        if status.is_some() {
            sql.push_str(" WHERE status = ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (limit, offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit.max(0))),
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {}", offset.max(0)));
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.to_string());
        }
        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            sessions.push(self.hydrate(row).await?);
        }

        Ok(sessions)
    }

    async fn update_visitor_connection(
        &self,
        session_id: &Uuid,
        connection_id: &ConnectionId,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET visitor_connection_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(connection_id.to_string())
        .bind(format_datetime(&updated_at))
        .bind(session_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn assign_agent(
        &self,
        session_id: &Uuid,
        agent: &AgentRef,
        join_entry: &ChatEntry,
    ) -> Result<bool, RepositoryError> {
        let id = session_id.to_string();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Conditional update: only a waiting session without an agent can be taken.
        let result = sqlx::query(
            r#"UPDATE chat_sessions
               SET agent_identity = ?, agent_connection_id = ?, agent_display_name = ?,
                   status = 'active', updated_at = ?
               WHERE id = ? AND status = 'waiting' AND agent_connection_id IS NULL"#,
        )
        .bind(agent.identity.as_str())
        .bind(agent.connection_id.to_string())
        .bind(&agent.display_name)
        .bind(format_datetime(&join_entry.timestamp))
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM chat_sessions WHERE id = ?")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            tx.rollback()
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(RepositoryError::NotFound),
            };
        }

        insert_entry(&mut tx, &id, join_entry).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(true)
    }

    async fn append_entry(&self, session_id: &Uuid, entry: &ChatEntry) -> Result<(), RepositoryError> {
        let id = session_id.to_string();
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        insert_entry(&mut tx, &id, entry).await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(format_datetime(&entry.timestamp))
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_status(
        &self,
        session_id: &Uuid,
        status: SessionStatus,
        reason: Option<EndReason>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET status = ?, closed_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(reason.map(|r| r.to_string()))
        .bind(format_datetime(&updated_at))
        .bind(session_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
