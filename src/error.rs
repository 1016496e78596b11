//! Crate-wide error taxonomy.
//!
//! All fallible operations in `vela-core` return [`Result`]. Variants line up with the
//! error classes a caller needs to react to differently: validation failures are the
//! caller's fault and never retried, conflicts and timeouts are retried with backoff,
//! Kubernetes/database errors are classified as retriable unless the API server itself
//! says otherwise.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OperationError>;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OperationError {
    /// Whether a caller should retry the operation that produced this error.
    ///
    /// Validation, quota, and not-found are permanent for the given input; everything
    /// else reflects transient infrastructure state and is worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            OperationError::Validation(_)
            | OperationError::Quota(_)
            | OperationError::NotFound(_) => false,
            OperationError::Conflict(_) | OperationError::Timeout(_) => true,
            OperationError::Kube(kube::Error::Api(resp)) => resp.code >= 500 || resp.code == 429,
            OperationError::Kube(_) => true,
            OperationError::Database(_) => true,
            OperationError::Io(_) => true,
            OperationError::Config(_) | OperationError::Internal(_) => false,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        OperationError::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        OperationError::Validation(what.into())
    }
}
