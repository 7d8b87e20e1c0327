//! In-process [`RemoteStore`] with the same object model as the HTTP API.
//!
//! Objects are content-addressed with git-style ids. Every mutating call is
//! counted, failures can be queued per operation, and hooks can run just
//! before an operation to simulate a concurrent writer.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use autosync_core::{HeadRef, TreeEntry, MODE_FILE};
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};

use crate::api::{
    BranchInfo, CommitInfo, CommitSummary, EntryKind, Operation, RemoteEntry, RemoteStore,
};
use crate::error::ApiError;
use crate::object::blob_id;

type Hook = Box<dyn FnOnce(&MemoryRemote) + Send>;

#[derive(Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, Vec<TreeEntry>>,
    commits: HashMap<String, CommitInfo>,
    committed_at: HashMap<String, DateTime<Utc>>,
    refs: BTreeMap<String, String>,
    comments: Vec<(String, String)>,
    mutations: usize,
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, VecDeque<ApiError>>,
    sequence: u64,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    hooks: Mutex<HashMap<Operation, Vec<Hook>>>,
    latency: Option<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long at the start of every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic inside a test hook must not wedge every later call.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Test controls
    // -----------------------------------------------------------------------

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, error: ApiError, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Run `hook` once, right before the next call of `op`.
    pub fn before_next<F>(&self, op: Operation, hook: F)
    where
        F: FnOnce(&MemoryRemote) + Send + 'static,
    {
        let mut hooks = self.hooks.lock().unwrap_or_else(|p| p.into_inner());
        hooks.entry(op).or_default().push(Box::new(hook));
    }

    /// Commit `files` on top of `branch` (or as a root commit) outside the
    /// mutation counter, as another client would.
    pub fn push_foreign_commit(&self, branch: &str, files: &[(&str, &[u8])]) -> HeadRef {
        let mut state = self.lock();
        let entries: Vec<TreeEntry> = files
            .iter()
            .map(|(path, content)| {
                let sha = blob_id(content);
                state.blobs.insert(sha.clone(), content.to_vec());
                TreeEntry::file(*path, sha)
            })
            .collect();
        let tree_sha = insert_tree(&mut state, entries);
        let parents: Vec<String> = state.refs.get(branch).cloned().into_iter().collect();
        let commit_sha = insert_commit(&mut state, &tree_sha, parents, "foreign commit");
        state.refs.insert(branch.to_string(), commit_sha.clone());
        HeadRef {
            commit_sha,
            tree_sha,
        }
    }

    /// Path → bytes for the tree `branch` currently points at.
    pub fn branch_files(&self, branch: &str) -> BTreeMap<String, Vec<u8>> {
        let state = self.lock();
        let Some(tree) = state
            .refs
            .get(branch)
            .and_then(|c| state.commits.get(c))
            .and_then(|commit| state.trees.get(&commit.tree_sha))
        else {
            return BTreeMap::new();
        };
        tree.iter()
            .filter_map(|e| {
                state
                    .blobs
                    .get(&e.blob_sha)
                    .map(|bytes| (e.path.clone(), bytes.clone()))
            })
            .collect()
    }

    pub fn head(&self, branch: &str) -> Option<HeadRef> {
        let state = self.lock();
        let commit_sha = state.refs.get(branch)?.clone();
        let tree_sha = state.commits.get(&commit_sha)?.tree_sha.clone();
        Some(HeadRef {
            commit_sha,
            tree_sha,
        })
    }

    pub fn branches(&self) -> Vec<String> {
        self.lock().refs.keys().cloned().collect()
    }

    pub fn commit_info(&self, sha: &str) -> Option<CommitInfo> {
        self.lock().commits.get(sha).cloned()
    }

    /// `(commit_sha, body)` pairs in posting order.
    pub fn comments(&self) -> Vec<(String, String)> {
        self.lock().comments.clone()
    }

    /// Successful mutating calls so far.
    pub fn mutation_count(&self) -> usize {
        self.lock().mutations
    }

    /// Calls of `op` so far, failed ones included.
    pub fn call_count(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Common prologue for every call: latency, hooks, bookkeeping and
    /// injected failures.
    fn enter(&self, op: Operation) -> Result<MutexGuard<'_, State>, ApiError> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let pending: Vec<Hook> = {
            let mut hooks = self.hooks.lock().unwrap_or_else(|p| p.into_inner());
            hooks.remove(&op).unwrap_or_default()
        };
        for hook in pending {
            hook(self);
        }
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryRemote")
            .field("refs", &state.refs)
            .field("mutations", &state.mutations)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Object helpers
// ---------------------------------------------------------------------------

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn insert_tree(state: &mut State, mut entries: Vec<TreeEntry>) -> String {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    let mut parts: Vec<&[u8]> = vec![b"tree".as_slice()];
    for entry in &entries {
        parts.push(entry.path.as_bytes());
        parts.push(entry.mode.as_bytes());
        parts.push(entry.blob_sha.as_bytes());
    }
    let sha = digest(&parts);
    state.trees.insert(sha.clone(), entries);
    sha
}

fn insert_commit(state: &mut State, tree_sha: &str, parents: Vec<String>, message: &str) -> String {
    state.sequence += 1;
    let sequence = state.sequence.to_string();
    let joined = parents.join(",");
    let sha = digest(&[
        b"commit".as_slice(),
        tree_sha.as_bytes(),
        joined.as_bytes(),
        message.as_bytes(),
        sequence.as_bytes(),
    ]);
    state.committed_at.insert(sha.clone(), Utc::now());
    state.commits.insert(
        sha.clone(),
        CommitInfo {
            sha: sha.clone(),
            tree_sha: tree_sha.to_string(),
            parents,
            message: message.to_string(),
        },
    );
    sha
}

fn resolve_commit<'a>(state: &'a State, reference: &str) -> Option<&'a CommitInfo> {
    let sha = state.refs.get(reference).map(String::as_str).unwrap_or(reference);
    state.commits.get(sha)
}

fn rejected(op: Operation, message: impl Into<String>) -> ApiError {
    ApiError::Rejected {
        op,
        status: 422,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// RemoteStore
// ---------------------------------------------------------------------------

impl RemoteStore for MemoryRemote {
    fn branch_head(&self, branch: &str) -> Result<Option<String>, ApiError> {
        let state = self.enter(Operation::BranchHead)?;
        Ok(state.refs.get(branch).cloned())
    }

    fn commit(&self, sha: &str) -> Result<CommitInfo, ApiError> {
        let op = Operation::Commit;
        let state = self.enter(op)?;
        state.commits.get(sha).cloned().ok_or_else(|| ApiError::NotFound {
            op,
            what: format!("commit {sha}"),
        })
    }

    fn tree_listing(&self, tree_sha: &str) -> Result<Vec<RemoteEntry>, ApiError> {
        let op = Operation::TreeListing;
        let state = self.enter(op)?;
        let tree = state.trees.get(tree_sha).ok_or_else(|| ApiError::NotFound {
            op,
            what: format!("tree {tree_sha}"),
        })?;
        Ok(tree
            .iter()
            .map(|entry| RemoteEntry {
                path: entry.path.clone(),
                sha: entry.blob_sha.clone(),
                kind: EntryKind::Blob,
            })
            .collect())
    }

    fn file_content(&self, path: &str, reference: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let state = self.enter(Operation::FileContent)?;
        let Some(commit) = resolve_commit(&state, reference) else {
            return Ok(None);
        };
        Ok(state
            .trees
            .get(&commit.tree_sha)
            .and_then(|tree| tree.iter().find(|e| e.path == path))
            .and_then(|entry| state.blobs.get(&entry.blob_sha))
            .cloned())
    }

    fn blob_content(&self, sha: &str) -> Result<Vec<u8>, ApiError> {
        let op = Operation::BlobContent;
        let state = self.enter(op)?;
        state.blobs.get(sha).cloned().ok_or_else(|| ApiError::NotFound {
            op,
            what: format!("blob {sha}"),
        })
    }

    fn list_commits(&self, branch: &str, limit: usize) -> Result<Vec<CommitSummary>, ApiError> {
        let state = self.enter(Operation::ListCommits)?;
        let mut history = Vec::new();
        let mut next = state.refs.get(branch).cloned();
        while let Some(sha) = next {
            if history.len() == limit {
                break;
            }
            let Some(commit) = state.commits.get(&sha) else {
                break;
            };
            history.push(CommitSummary {
                sha: sha.clone(),
                message: commit.message.clone(),
                committed_at: state.committed_at.get(&sha).copied(),
            });
            next = commit.parents.first().cloned();
        }
        Ok(history)
    }

    fn commit_comments(&self, sha: &str) -> Result<Vec<String>, ApiError> {
        let state = self.enter(Operation::CommitComments)?;
        Ok(state
            .comments
            .iter()
            .filter(|(commit, _)| commit == sha)
            .map(|(_, body)| body.clone())
            .collect())
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>, ApiError> {
        let state = self.enter(Operation::ListBranches)?;
        Ok(state
            .refs
            .iter()
            .map(|(name, sha)| BranchInfo {
                name: name.clone(),
                commit_sha: sha.clone(),
            })
            .collect())
    }

    fn create_blob(&self, content: &[u8]) -> Result<String, ApiError> {
        let mut state = self.enter(Operation::CreateBlob)?;
        let sha = blob_id(content);
        state.blobs.insert(sha.clone(), content.to_vec());
        state.mutations += 1;
        Ok(sha)
    }

    fn create_tree(&self, entries: &[TreeEntry]) -> Result<String, ApiError> {
        let op = Operation::CreateTree;
        let mut state = self.enter(op)?;
        for entry in entries {
            if entry.path.is_empty() || entry.path.starts_with('/') || entry.path.ends_with('/') {
                return Err(rejected(op, format!("invalid path '{}'", entry.path)));
            }
            if entry.mode != MODE_FILE {
                return Err(rejected(op, format!("unsupported mode {}", entry.mode)));
            }
            if !state.blobs.contains_key(&entry.blob_sha) {
                return Err(rejected(op, format!("unknown blob {}", entry.blob_sha)));
            }
        }
        let sha = insert_tree(&mut state, entries.to_vec());
        state.mutations += 1;
        Ok(sha)
    }

    fn create_commit(
        &self,
        tree_sha: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String, ApiError> {
        let op = Operation::CreateCommit;
        let mut state = self.enter(op)?;
        if !state.trees.contains_key(tree_sha) {
            return Err(rejected(op, format!("unknown tree {tree_sha}")));
        }
        if let Some(missing) = parents.iter().find(|p| !state.commits.contains_key(*p)) {
            return Err(rejected(op, format!("unknown parent {missing}")));
        }
        let sha = insert_commit(&mut state, tree_sha, parents.to_vec(), message);
        state.mutations += 1;
        Ok(sha)
    }

    fn update_ref(&self, branch: &str, sha: &str, force: bool) -> Result<(), ApiError> {
        let op = Operation::UpdateRef;
        let mut state = self.enter(op)?;
        let Some(current) = state.refs.get(branch).cloned() else {
            return Err(ApiError::NotFound {
                op,
                what: format!("reference refs/heads/{branch}"),
            });
        };
        let Some(target) = state.commits.get(sha) else {
            return Err(rejected(op, format!("unknown commit {sha}")));
        };
        if !force && !target.parents.contains(&current) && current != sha {
            return Err(rejected(op, "update is not a fast forward"));
        }
        state.refs.insert(branch.to_string(), sha.to_string());
        state.mutations += 1;
        Ok(())
    }

    fn create_ref(&self, branch: &str, sha: &str) -> Result<(), ApiError> {
        let op = Operation::CreateRef;
        let mut state = self.enter(op)?;
        if state.refs.contains_key(branch) {
            return Err(ApiError::AlreadyExists {
                name: branch.to_string(),
            });
        }
        if !state.commits.contains_key(sha) {
            return Err(rejected(op, format!("unknown commit {sha}")));
        }
        state.refs.insert(branch.to_string(), sha.to_string());
        state.mutations += 1;
        Ok(())
    }

    fn comment_on_commit(&self, sha: &str, body: &str) -> Result<(), ApiError> {
        let op = Operation::CommentOnCommit;
        let mut state = self.enter(op)?;
        if !state.commits.contains_key(sha) {
            return Err(ApiError::NotFound {
                op,
                what: format!("commit {sha}"),
            });
        }
        state.comments.push((sha.to_string(), body.to_string()));
        state.mutations += 1;
        Ok(())
    }
}
