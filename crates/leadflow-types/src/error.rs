use thiserror::Error;

/// Errors from repository operations (used by trait definitions in leadflow-core).
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

/// Failure classes shared by every component.
///
/// Callers decide retry and reporting behaviour from the kind, never from
/// the concrete error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Rejected up front, never retried.
    Validation,
    /// Signature or credential mismatch. Logged and dropped.
    Authentication,
    /// Engine timeout, 5xx, connection failure. Retried with backoff.
    TransientExternal,
    /// Engine 4xx rejection. Terminal for the execution.
    PermanentExternal,
    /// The approval window elapsed. A business outcome.
    ApprovalExpired,
    /// Lost a compare-and-set race. The other writer already handled it.
    Conflict,
    /// Lookup of an unknown entity.
    NotFound,
    /// Storage unavailable or an invariant broke.
    Internal,
}

impl ErrorKind {
    /// Whether the operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientExternal | ErrorKind::Internal)
    }
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::Connection | RepositoryError::Query(_) => ErrorKind::Internal,
            RepositoryError::NotFound => ErrorKind::NotFound,
            RepositoryError::Conflict(_) => ErrorKind::Conflict,
        }
    }
}
