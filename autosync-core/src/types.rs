//! Domain types shared by every stage of the push pipeline.
//!
//! Remote paths are always `/`-separated strings relative to the repository
//! root; local filesystem paths use `PathBuf`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tree mode for a regular (non-executable) file.
pub const MODE_FILE: &str = "100644";

// ---------------------------------------------------------------------------
// Local side
// ---------------------------------------------------------------------------

/// Fingerprint of one local file, rebuilt on every pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub relative_path: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    /// SHA-256 hex digest of the file bytes.
    pub content_hash: String,
    /// Git-style blob object id (SHA-1 hex) of the same bytes.
    pub blob_id: String,
}

/// Local snapshot keyed by relative path.
pub type Snapshot = BTreeMap<String, FileRecord>;

// ---------------------------------------------------------------------------
// Remote side
// ---------------------------------------------------------------------------

/// Resolved branch head: the commit and the tree it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRef {
    pub commit_sha: String,
    pub tree_sha: String,
}

/// Paths of all blobs in the remote tree at one commit.
///
/// The blob sha is kept when the listing supplies it; it is `None` for
/// listings that only carry paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteBlobSet {
    entries: BTreeMap<String, Option<String>>,
}

impl RemoteBlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, blob_sha: Option<String>) {
        self.entries.insert(path.into(), blob_sha);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn blob_sha(&self, path: &str) -> Option<&str> {
        self.entries.get(path).and_then(|sha| sha.as_deref())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for RemoteBlobSet {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<String> for RemoteBlobSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        iter.into_iter().map(|path| (path, None)).collect()
    }
}

// ---------------------------------------------------------------------------
// Change classification
// ---------------------------------------------------------------------------

/// Classification of every visible path for one pipeline run.
///
/// `added`, `modified` and `deleted` drive the push; `unchanged` holds paths
/// whose local bytes are known to match the remote blob and is carried into
/// the new tree without an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    #[serde(default)]
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    /// Build from unsorted lists; every list is sorted and deduplicated.
    pub fn from_parts(
        added: Vec<String>,
        modified: Vec<String>,
        deleted: Vec<String>,
        unchanged: Vec<String>,
    ) -> Self {
        Self {
            added: sorted(added),
            modified: sorted(modified),
            deleted: sorted(deleted),
            unchanged: sorted(unchanged),
        }
    }

    /// True when there is nothing to add, modify, or delete.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Number of paths that require a push.
    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Every path the change set classifies, across all four lists.
    pub fn union(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .chain(&self.unchanged)
            .cloned()
            .collect()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added: {}, modified: {}, deleted: {}, unchanged: {}",
            self.added.len(),
            self.modified.len(),
            self.deleted.len(),
            self.unchanged.len()
        )
    }
}

fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths.dedup();
    paths
}

// ---------------------------------------------------------------------------
// Tree / commit records
// ---------------------------------------------------------------------------

/// One file in a tree submitted to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    pub blob_sha: String,
}

impl TreeEntry {
    pub fn file(path: impl Into<String>, blob_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: MODE_FILE.to_string(),
            blob_sha: blob_sha.into(),
        }
    }
}

/// One force-push transaction. Dropped after success or retry exhaustion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAttempt {
    pub tree_sha: String,
    /// `None` when the branch does not exist yet (bootstrap).
    pub parent_sha: Option<String>,
    pub commit_message: String,
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Retry bookkeeping owned by the recovery handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub retry_count: u32,
    pub max_retries: u32,
    pub backoff_seconds: u64,
}

impl RecoveryState {
    pub fn new(max_retries: u32, backoff_seconds: u64) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            backoff_seconds,
        }
    }

    /// Count one caught failure. Returns `true` while another retry is allowed.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        !self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
