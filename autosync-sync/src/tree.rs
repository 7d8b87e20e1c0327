//! Tree builder.
//!
//! The new tree is complete, not incremental: it lists every tracked local
//! file, every local quarantine file, and the remote entries the pipeline
//! does not track (other extensions, quarantine copies no longer on disk).
//! Deleted tracked paths are simply absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use autosync_core::{ChangeSet, RemoteBlobSet, TreeEntry};
use autosync_remote::{blob_id, RemoteStore, RetryPolicy};
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::paths::{is_malformed, normalize, PathRules};
use crate::snapshot::relative_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeOutcome {
    Built {
        tree_sha: String,
        entries: Vec<TreeEntry>,
        /// Blobs sent to the remote.
        uploaded: usize,
        /// Entries whose blob the remote already had.
        reused: usize,
    },
    /// Nothing valid to commit.
    NoTree,
}

enum Source {
    Local(PathBuf),
    Remote(String),
}

pub struct TreeBuilder<'a> {
    remote: &'a dyn RemoteStore,
    root: &'a Path,
    rules: &'a PathRules,
    retry: RetryPolicy,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        remote: &'a dyn RemoteStore,
        root: &'a Path,
        rules: &'a PathRules,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            root,
            rules,
            retry,
        }
    }

    pub fn build(
        &self,
        changes: &ChangeSet,
        remote_blobs: &RemoteBlobSet,
    ) -> Result<TreeOutcome, SyncError> {
        let planned = self.plan(changes, remote_blobs);

        let mut entries = Vec::with_capacity(planned.len());
        let mut uploaded = 0;
        let mut reused = 0;
        for (path, source) in planned {
            let sha = match source {
                Source::Remote(sha) => {
                    reused += 1;
                    sha
                }
                Source::Local(file) => {
                    let content = match std::fs::read(&file) {
                        Ok(content) => content,
                        Err(err) => {
                            tracing::warn!("skipping {path}: {err}");
                            continue;
                        }
                    };
                    let local_id = blob_id(&content);
                    if remote_blobs.blob_sha(&path) == Some(local_id.as_str()) {
                        reused += 1;
                        local_id
                    } else {
                        let sha = self
                            .retry
                            .run("upload blob", || self.remote.create_blob(&content))?;
                        tracing::debug!("uploaded {path} as {sha}");
                        uploaded += 1;
                        sha
                    }
                }
            };
            entries.push(TreeEntry::file(path, sha));
        }

        if entries.is_empty() {
            tracing::info!("no valid tree entries; nothing to commit");
            return Ok(TreeOutcome::NoTree);
        }

        let tree_sha = self
            .retry
            .run("create tree", || self.remote.create_tree(&entries))?;
        tracing::info!(
            "built tree {tree_sha}: {} entries ({uploaded} uploaded, {reused} reused)",
            entries.len()
        );
        Ok(TreeOutcome::Built {
            tree_sha,
            entries,
            uploaded,
            reused,
        })
    }

    /// Path → where its bytes come from. The first claimant of a normalized
    /// path wins.
    fn plan(&self, changes: &ChangeSet, remote_blobs: &RemoteBlobSet) -> BTreeMap<String, Source> {
        let mut planned = BTreeMap::new();

        let local = changes.added.iter().chain(&changes.modified);
        for rel in local {
            self.claim(&mut planned, rel, Source::Local(self.root.join(rel)));
        }
        for rel in &changes.unchanged {
            let source = match remote_blobs.blob_sha(rel) {
                Some(sha) => Source::Remote(sha.to_string()),
                None => Source::Local(self.root.join(rel)),
            };
            self.claim(&mut planned, rel, source);
        }

        for (rel, file) in self.quarantine_files() {
            self.claim(&mut planned, &rel, Source::Local(file));
        }

        for rel in remote_blobs.paths() {
            if self.rules.is_tracked(rel) || is_malformed(rel) || planned.contains_key(rel) {
                continue;
            }
            if let Some(sha) = remote_blobs.blob_sha(rel) {
                planned.insert(rel.to_string(), Source::Remote(sha.to_string()));
            }
        }

        planned
    }

    fn claim(&self, planned: &mut BTreeMap<String, Source>, rel: &str, source: Source) {
        let Some(path) = normalize(rel).filter(|p| !is_malformed(p)) else {
            tracing::warn!("skipping invalid path {rel:?}");
            return;
        };
        if planned.contains_key(&path) {
            tracing::warn!("skipping {rel:?}: collides with {path:?}");
            return;
        }
        planned.insert(path, source);
    }

    fn quarantine_files(&self) -> Vec<(String, PathBuf)> {
        let quarantine_root = self.root.join(self.rules.quarantine_dir());
        if !quarantine_root.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&quarantine_root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let rel = relative_path(self.root, entry.path())?;
                self.rules
                    .is_quarantine_file(&rel)
                    .then(|| (rel, entry.into_path()))
            })
            .collect()
    }
}
