//! # autosync-sync
//!
//! The folder-to-remote push pipeline.
//!
//! Call [`Pipeline::run_once`] for a single run or
//! [`Pipeline::run_with_recovery`] to re-run after recoverable failures. The
//! stages are public so the CLI can show a plan without pushing.

pub mod archive;
pub mod conflict;
pub mod describe;
pub mod diff;
pub mod error;
pub mod history;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod push;
pub mod reader;
pub mod recovery;
pub mod restore;
pub mod snapshot;
pub mod tree;
mod writer;

pub use archive::ArchiveReport;
pub use conflict::{ConflictGuard, ConflictOutcome};
pub use describe::{CommitDescriber, DescribeRequest, DiffDescriber, TimestampDescriber};
pub use error::SyncError;
pub use history::{History, HistoryEntry};
pub use lock::{MarkerFile, PushGuard, PushLock, SingleFlight};
pub use paths::PathRules;
pub use pipeline::{Pipeline, PipelineOutcome, Plan, PushSummary, SkipReason};
pub use push::{PushOrchestrator, PushReport, PushState};
pub use reader::RemoteState;
pub use recovery::RecoveryHandler;
pub use restore::RestoreReport;
pub use tree::{TreeBuilder, TreeOutcome};
