//! Read-only user lookup port.
//!
//! The coordinator only needs display names to attribute join notices. The
//! user service that owns accounts implements `UserDirectory`; the SQLite
//! adapter lives in livedesk-infra.

use std::collections::HashMap;
use std::sync::Arc;

use livedesk_types::error::RepositoryError;
use livedesk_types::identity::UserRef;

pub trait UserDirectory: Send + Sync {
    /// Display name for a user, or `None` if the user is unknown.
    fn display_name(
        &self,
        user: &UserRef,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;
}

/// Fixed map of user references to names.
///
/// An empty directory resolves nothing, so callers fall back to the raw
/// identity.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    names: Arc<HashMap<UserRef, String>>,
}

impl StaticUserDirectory {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let names = entries
            .into_iter()
            .map(|(k, v)| (UserRef::new(k), v.into()))
            .collect();
        Self {
            names: Arc::new(names),
        }
    }
}

impl UserDirectory for StaticUserDirectory {
    async fn display_name(&self, user: &UserRef) -> Result<Option<String>, RepositoryError> {
        Ok(self.names.get(user).cloned())
    }
}
