//! The remote repository contract.
//!
//! Paths are `/`-separated and relative to the repository root. Object ids
//! are lowercase hex strings.

use std::fmt;
use std::sync::Arc;

use autosync_core::TreeEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Names each remote call; used in errors, logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    BranchHead,
    Commit,
    TreeListing,
    FileContent,
    BlobContent,
    ListCommits,
    CommitComments,
    ListBranches,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
    CreateRef,
    CommentOnCommit,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::BranchHead => "branch_head",
            Operation::Commit => "commit",
            Operation::TreeListing => "tree_listing",
            Operation::FileContent => "file_content",
            Operation::BlobContent => "blob_content",
            Operation::ListCommits => "list_commits",
            Operation::CommitComments => "commit_comments",
            Operation::ListBranches => "list_branches",
            Operation::CreateBlob => "create_blob",
            Operation::CreateTree => "create_tree",
            Operation::CreateCommit => "create_commit",
            Operation::UpdateRef => "update_ref",
            Operation::CreateRef => "create_ref",
            Operation::CommentOnCommit => "comment_on_commit",
        }
    }

    /// Whether the call changes remote state.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Operation::CreateBlob
                | Operation::CreateTree
                | Operation::CreateCommit
                | Operation::UpdateRef
                | Operation::CreateRef
                | Operation::CommentOnCommit
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A commit object as returned by the single-commit endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub tree_sha: String,
    pub parents: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

/// One entry of a branch's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit_sha: String,
}

/// One row of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub sha: String,
    pub kind: EntryKind,
}

/// Blocking access to one repository.
///
/// Implementations must be shareable across threads: the pipeline runs on a
/// blocking worker while the comment poster runs on its own thread.
pub trait RemoteStore: Send + Sync {
    /// Commit sha the branch points at, or `None` if the ref does not exist.
    fn branch_head(&self, branch: &str) -> Result<Option<String>, ApiError>;

    fn commit(&self, sha: &str) -> Result<CommitInfo, ApiError>;

    /// Every entry under `tree_sha`, recursively.
    fn tree_listing(&self, tree_sha: &str) -> Result<Vec<RemoteEntry>, ApiError>;

    /// Raw bytes of `path` at `reference` (branch or commit), `None` on 404.
    fn file_content(&self, path: &str, reference: &str) -> Result<Option<Vec<u8>>, ApiError>;

    /// Raw bytes of a blob by id. Works for files of any size.
    fn blob_content(&self, sha: &str) -> Result<Vec<u8>, ApiError>;

    /// Up to `limit` commits reachable from `branch`, newest first. Empty for
    /// a branch that does not exist.
    fn list_commits(&self, branch: &str, limit: usize) -> Result<Vec<CommitSummary>, ApiError>;

    /// Bodies of the comments attached to a commit, oldest first.
    fn commit_comments(&self, sha: &str) -> Result<Vec<String>, ApiError>;

    /// Every branch of the repository, sorted by name.
    fn list_branches(&self) -> Result<Vec<BranchInfo>, ApiError>;

    fn create_blob(&self, content: &[u8]) -> Result<String, ApiError>;

    /// Create a tree from scratch (no base tree) and return its sha.
    fn create_tree(&self, entries: &[TreeEntry]) -> Result<String, ApiError>;

    fn create_commit(
        &self,
        tree_sha: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String, ApiError>;

    /// Point `branch` at `sha`. With `force` the fast-forward check is skipped.
    fn update_ref(&self, branch: &str, sha: &str, force: bool) -> Result<(), ApiError>;

    /// Create `refs/heads/<branch>`; [`ApiError::AlreadyExists`] if taken.
    fn create_ref(&self, branch: &str, sha: &str) -> Result<(), ApiError>;

    fn comment_on_commit(&self, sha: &str, body: &str) -> Result<(), ApiError>;
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn branch_head(&self, branch: &str) -> Result<Option<String>, ApiError> {
        (**self).branch_head(branch)
    }

    fn commit(&self, sha: &str) -> Result<CommitInfo, ApiError> {
        (**self).commit(sha)
    }

    fn tree_listing(&self, tree_sha: &str) -> Result<Vec<RemoteEntry>, ApiError> {
        (**self).tree_listing(tree_sha)
    }

    fn file_content(&self, path: &str, reference: &str) -> Result<Option<Vec<u8>>, ApiError> {
        (**self).file_content(path, reference)
    }

    fn blob_content(&self, sha: &str) -> Result<Vec<u8>, ApiError> {
        (**self).blob_content(sha)
    }

    fn list_commits(&self, branch: &str, limit: usize) -> Result<Vec<CommitSummary>, ApiError> {
        (**self).list_commits(branch, limit)
    }

    fn commit_comments(&self, sha: &str) -> Result<Vec<String>, ApiError> {
        (**self).commit_comments(sha)
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>, ApiError> {
        (**self).list_branches()
    }

    fn create_blob(&self, content: &[u8]) -> Result<String, ApiError> {
        (**self).create_blob(content)
    }

    fn create_tree(&self, entries: &[TreeEntry]) -> Result<String, ApiError> {
        (**self).create_tree(entries)
    }

    fn create_commit(
        &self,
        tree_sha: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String, ApiError> {
        (**self).create_commit(tree_sha, parents, message)
    }

    fn update_ref(&self, branch: &str, sha: &str, force: bool) -> Result<(), ApiError> {
        (**self).update_ref(branch, sha, force)
    }

    fn create_ref(&self, branch: &str, sha: &str) -> Result<(), ApiError> {
        (**self).create_ref(branch, sha)
    }

    fn comment_on_commit(&self, sha: &str, body: &str) -> Result<(), ApiError> {
        (**self).comment_on_commit(sha, body)
    }
}
