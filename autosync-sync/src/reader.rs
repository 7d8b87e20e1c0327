//! Remote tree reader.

use autosync_core::{HeadRef, RemoteBlobSet};
use autosync_remote::{EntryKind, RemoteStore, RetryPolicy};

use crate::error::SyncError;

/// What the remote branch looked like when the run started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    /// `None` when the branch does not exist yet.
    pub head: Option<HeadRef>,
    pub blobs: RemoteBlobSet,
}

impl RemoteState {
    pub fn needs_bootstrap(&self) -> bool {
        self.head.is_none()
    }
}

/// Resolve `branch` and list every blob of its tree.
///
/// A missing branch is an empty repository, not an error.
pub fn read(
    remote: &dyn RemoteStore,
    branch: &str,
    retry: &RetryPolicy,
) -> Result<RemoteState, SyncError> {
    let Some(commit_sha) = retry.run("read head", || remote.branch_head(branch))? else {
        tracing::info!("branch {branch} does not exist yet; remote needs bootstrap");
        return Ok(RemoteState::default());
    };
    let commit = retry.run("read commit", || remote.commit(&commit_sha))?;
    let listing = retry.run("read tree", || remote.tree_listing(&commit.tree_sha))?;

    let blobs: RemoteBlobSet = listing
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Blob)
        .map(|entry| (entry.path, Some(entry.sha)))
        .collect();
    tracing::debug!(
        "remote {branch} at {}: {} blobs",
        short(&commit_sha),
        blobs.len()
    );

    Ok(RemoteState {
        head: Some(HeadRef {
            commit_sha,
            tree_sha: commit.tree_sha,
        }),
        blobs,
    })
}

pub(crate) fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
