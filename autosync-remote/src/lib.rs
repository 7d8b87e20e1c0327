//! # autosync-remote
//!
//! The remote repository boundary: a blocking [`RemoteStore`] trait over a
//! blob/tree/commit/ref REST API, the [`HttpRemote`] client that speaks it,
//! the shared [`RetryPolicy`], and [`MemoryRemote`], an in-process store with
//! the same semantics.

pub mod api;
pub mod error;
pub mod http;
pub mod memory;
pub mod object;
pub mod retry;

pub use api::{
    BranchInfo, CommitInfo, CommitSummary, EntryKind, Operation, RemoteEntry, RemoteStore,
};
pub use error::ApiError;
pub use http::HttpRemote;
pub use memory::MemoryRemote;
pub use object::{blob_id, BlobHasher};
pub use retry::{Backoff, RetryPolicy};
