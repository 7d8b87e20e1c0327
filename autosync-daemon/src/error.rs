use std::path::PathBuf;

use thiserror::Error;

/// Failures of the watcher/processor runtime and of socket clients talking
/// to it. Pipeline failures inside a run are reported to the requester, not
/// raised here; `Pipeline` only covers setup.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Config(#[from] autosync_core::ConfigError),

    #[error("pipeline setup failed: {0}")]
    Pipeline(#[from] autosync_sync::SyncError),

    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),

    /// A runtime task went away while a request was waiting on it.
    #[error("daemon is shutting down ({0} closed)")]
    ChannelClosed(&'static str),

    #[error("{0}")]
    Protocol(String),

    /// No listener on the control socket.
    #[error("autosync daemon is not running (no listener on {socket})")]
    NotRunning { socket: PathBuf },
}

impl DaemonError {
    pub fn is_not_running(&self) -> bool {
        matches!(self, DaemonError::NotRunning { .. })
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
