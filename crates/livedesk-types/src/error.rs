use thiserror::Error;
use uuid::Uuid;

/// Errors from repository operations (used by trait definitions in livedesk-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Malformed or missing input on an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("identity must not be empty")]
    EmptyIdentity,

    #[error("session id is missing")]
    MissingSessionId,

    #[error("message text must not be empty")]
    EmptyMessage,

    #[error("message exceeds {0} bytes")]
    MessageTooLong(usize),

    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Errors returned by coordinator operations to the calling connection.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The session does not exist, is closed, or is in the wrong state.
    #[error("session {0} is no longer available")]
    NotFound(Uuid),

    /// Another agent already holds the session.
    #[error("session {0} is already assigned")]
    AlreadyAssigned(Uuid),

    /// The connection is not a participant of the session.
    #[error("connection is not a participant of session {0}")]
    NotParticipant(Uuid),

    /// The connection's role or identity does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The connection is already attached to another live session.
    #[error("connection is already in live session {0}")]
    ConnectionBusy(Uuid),

    #[error("{operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: RepositoryError,
    },

    /// The coordinator task is gone.
    #[error("coordinator has shut down")]
    Shutdown,
}

impl CoordinatorError {
    pub fn persistence(operation: &'static str, source: RepositoryError) -> Self {
        CoordinatorError::Persistence { operation, source }
    }

    /// Machine-readable code sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::Validation(_) => "VALIDATION_ERROR",
            CoordinatorError::NotFound(_) => "NOT_FOUND",
            CoordinatorError::AlreadyAssigned(_) => "ALREADY_ASSIGNED",
            CoordinatorError::NotParticipant(_) | CoordinatorError::Forbidden(_) => "FORBIDDEN",
            CoordinatorError::ConnectionBusy(_) => "CONNECTION_BUSY",
            CoordinatorError::Persistence { .. } => "PERSISTENCE_ERROR",
            CoordinatorError::Shutdown => "UNAVAILABLE",
        }
    }
}
