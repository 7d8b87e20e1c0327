//! Error types for autosync-sync.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use autosync_core::ConfigError;
use autosync_remote::ApiError;

/// All errors that can escape a pipeline stage.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A remote call failed after its retry budget.
    #[error("remote error: {0}")]
    Api(#[from] ApiError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (marker file, conflict record).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote diverged and the backup branch could not be created.
    /// The push was aborted; details were recorded at `record`.
    #[error("could not back up diverged head as {branch} (recorded at {record}): {source}")]
    BackupFailed {
        branch: String,
        record: PathBuf,
        #[source]
        source: ApiError,
    },

    /// A restore only ever fills an empty directory.
    #[error("refusing to restore into {path}: directory is not empty")]
    TargetNotEmpty { path: PathBuf },
}

impl SyncError {
    /// Whether re-running the whole pipeline may succeed.
    ///
    /// Recoverable: exhausted transient remote failures, a missing remote
    /// object or reference, and files or directories vanishing mid-run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Api(err) => err.is_transient() || err.is_not_found(),
            SyncError::Io { source, .. } => source.kind() == ErrorKind::NotFound,
            SyncError::BackupFailed { source, .. } => source.is_transient(),
            SyncError::Config(_) | SyncError::Json(_) | SyncError::TargetNotEmpty { .. } => false,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autosync_remote::Operation;

    #[test]
    fn vanished_file_is_recoverable() {
        let err = io_err("notes/a.md", std::io::Error::from(ErrorKind::NotFound));
        assert!(err.is_recoverable());
    }

    #[test]
    fn permission_denied_is_fatal() {
        let err = io_err("notes/a.md", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn auth_failure_is_fatal() {
        let err = SyncError::from(ApiError::Unauthorized {
            op: Operation::BranchHead,
            status: 401,
            message: "Bad credentials".into(),
        });
        assert!(!err.is_recoverable());
    }

    #[test]
    fn missing_reference_is_recoverable() {
        let err = SyncError::from(ApiError::NotFound {
            op: Operation::UpdateRef,
            what: "reference refs/heads/main".into(),
        });
        assert!(err.is_recoverable());
    }
}
