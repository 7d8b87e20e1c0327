//! Configuration failures.

use std::path::PathBuf;

use thiserror::Error;

/// Why a [`SyncConfig`](crate::SyncConfig) could not be produced or stored.
///
/// `NotInitialized` and `Invalid` are operator mistakes and carry a hint;
/// the rest are filesystem or YAML problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode config as YAML: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// The file exists but is not a config this version understands.
    #[error("{path} is not a valid autosync config: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no home directory; set $HOME so ~/.autosync can be located")]
    HomeNotFound,

    #[error("no config at {path}; run `autosync init` first")]
    NotInitialized { path: PathBuf },

    /// `field` names a config key or an environment variable.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
