//! Error types for autosync-remote.

use thiserror::Error;

use crate::api::Operation;

/// Every failure a [`RemoteStore`](crate::RemoteStore) call can report.
///
/// Variants split along the retry boundary: [`ApiError::is_transient`] is
/// true only for `Status` and `Transport`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// 401/403: bad token or missing scope.
    #[error("{op}: unauthorized (HTTP {status}): {message}")]
    Unauthorized {
        op: Operation,
        status: u16,
        message: String,
    },

    /// 404 on an object or reference the call required.
    #[error("{op}: not found: {what}")]
    NotFound { op: Operation, what: String },

    /// Reference creation for a name that is already taken.
    #[error("reference already exists: {name}")]
    AlreadyExists { name: String },

    /// Validation failure (400/409/422): retrying cannot help.
    #[error("{op}: rejected (HTTP {status}): {message}")]
    Rejected {
        op: Operation,
        status: u16,
        message: String,
    },

    /// Any other non-2xx status, including 408/429/5xx.
    #[error("{op}: HTTP {status}: {message}")]
    Status {
        op: Operation,
        status: u16,
        message: String,
    },

    /// Connection, DNS, TLS or timeout failure before a status arrived.
    #[error("{op}: transport error: {message}")]
    Transport { op: Operation, message: String },

    /// The response body did not match the expected shape.
    #[error("{op}: malformed response: {message}")]
    Decode { op: Operation, message: String },

    /// The server capped a listing; acting on the partial result would drop
    /// the unlisted entries.
    #[error("{op}: listing of tree {tree_sha} is incomplete")]
    Truncated { op: Operation, tree_sha: String },
}

impl ApiError {
    /// True for failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Status { .. } | ApiError::Transport { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// The operation that failed, when known.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            ApiError::Unauthorized { op, .. }
            | ApiError::NotFound { op, .. }
            | ApiError::Rejected { op, .. }
            | ApiError::Status { op, .. }
            | ApiError::Transport { op, .. }
            | ApiError::Decode { op, .. }
            | ApiError::Truncated { op, .. } => Some(*op),
            ApiError::AlreadyExists { .. } => Some(Operation::CreateRef),
        }
    }
}
