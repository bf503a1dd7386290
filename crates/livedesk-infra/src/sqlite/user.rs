//! SQLite user directory.
//!
//! Reads display names from the `users` table. The table is owned by the
//! account service; this adapter never writes to it.

use livedesk_core::directory::UserDirectory;
use livedesk_types::error::RepositoryError;
use livedesk_types::identity::UserRef;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `UserDirectory`.
#[derive(Clone)]
pub struct SqliteUserDirectory {
    pool: DatabasePool,
}

impl SqliteUserDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl UserDirectory for SqliteUserDirectory {
    async fn display_name(&self, user: &UserRef) -> Result<Option<String>, RepositoryError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT display_name FROM users WHERE id = ?")
            .bind(user.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(row.map(|(name,)| name))
    }
}
