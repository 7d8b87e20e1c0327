//! Autosync core library: domain types, configuration snapshot, errors.
//!
//! Public API surface:
//! - [`types`]: records shared by every stage of the push pipeline
//! - [`config`]: [`SyncConfig`] load / save / validate
//! - [`paths`]: state-directory layout under `~/.autosync/`
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{PushRetrySettings, RecoverySettings, SyncConfig};
pub use error::ConfigError;
pub use types::{
    ChangeSet, FileRecord, HeadRef, PushAttempt, RecoveryState, RemoteBlobSet, Snapshot,
    TreeEntry, MODE_FILE,
};
