//! Conflict guard.
//!
//! Runs right before the commit. If the branch moved to a different tree
//! since the run read it, the diverged head is preserved on a timestamped
//! backup branch; the push then overwrites the branch as usual.

use std::path::PathBuf;

use autosync_core::HeadRef;
use autosync_remote::{ApiError, RemoteStore, RetryPolicy};
use chrono::{Local, Utc};
use serde::Serialize;

use crate::error::SyncError;
use crate::reader::short;
use crate::writer::atomic_write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    Clean,
    Diverged {
        backup_branch: String,
        diverged_head: HeadRef,
    },
}

/// Written to the conflicts directory when the backup branch cannot be made.
#[derive(Debug, Serialize)]
struct ConflictRecord<'a> {
    branch: &'a str,
    expected: Option<&'a HeadRef>,
    diverged_head: &'a HeadRef,
    backup_branch: &'a str,
    error: String,
    recorded_at: chrono::DateTime<Utc>,
}

pub struct ConflictGuard<'a> {
    remote: &'a dyn RemoteStore,
    branch: &'a str,
    backup_prefix: &'a str,
    conflicts_dir: PathBuf,
    read_retry: RetryPolicy,
    backup_retry: RetryPolicy,
}

impl<'a> ConflictGuard<'a> {
    pub fn new(
        remote: &'a dyn RemoteStore,
        branch: &'a str,
        backup_prefix: &'a str,
        conflicts_dir: PathBuf,
    ) -> Self {
        Self {
            remote,
            branch,
            backup_prefix,
            conflicts_dir,
            read_retry: RetryPolicy::network(),
            backup_retry: RetryPolicy::fixed(3, std::time::Duration::from_millis(2500)),
        }
    }

    pub fn with_retry(mut self, read_retry: RetryPolicy, backup_retry: RetryPolicy) -> Self {
        self.read_retry = read_retry;
        self.backup_retry = backup_retry;
        self
    }

    /// Compare the live head with `expected` (the head read at run start).
    pub fn check(&self, expected: Option<&HeadRef>) -> Result<ConflictOutcome, SyncError> {
        let current = self
            .read_retry
            .run("recheck head", || self.remote.branch_head(self.branch))?;
        let Some(current_sha) = current else {
            if expected.is_some() {
                tracing::warn!("branch {} disappeared since it was read", self.branch);
            }
            return Ok(ConflictOutcome::Clean);
        };
        if expected.is_some_and(|e| e.commit_sha == current_sha) {
            return Ok(ConflictOutcome::Clean);
        }

        let commit = self
            .read_retry
            .run("recheck commit", || self.remote.commit(&current_sha))?;
        if expected.is_some_and(|e| e.tree_sha == commit.tree_sha) {
            tracing::debug!("head moved to {} with an identical tree", short(&current_sha));
            return Ok(ConflictOutcome::Clean);
        }

        let diverged_head = HeadRef {
            commit_sha: current_sha,
            tree_sha: commit.tree_sha,
        };
        let backup_branch = format!(
            "{}{}",
            self.backup_prefix,
            Local::now().format("%Y%m%d_%H%M%S")
        );
        tracing::warn!(
            "remote {} diverged (now at {}); backing up as {backup_branch}",
            self.branch,
            short(&diverged_head.commit_sha)
        );

        let created = self.backup_retry.run_if(
            "create backup branch",
            ApiError::is_transient,
            || match self.remote.create_ref(&backup_branch, &diverged_head.commit_sha) {
                Err(ApiError::AlreadyExists { .. }) => Ok(()),
                other => other,
            },
        );

        match created {
            Ok(()) => Ok(ConflictOutcome::Diverged {
                backup_branch,
                diverged_head,
            }),
            Err(source) => {
                let record = self.record_failure(expected, &diverged_head, &backup_branch, &source)?;
                tracing::error!(
                    "backup of diverged head failed; push aborted, details in {}",
                    record.display()
                );
                Err(SyncError::BackupFailed {
                    branch: backup_branch,
                    record,
                    source,
                })
            }
        }
    }

    fn record_failure(
        &self,
        expected: Option<&HeadRef>,
        diverged_head: &HeadRef,
        backup_branch: &str,
        error: &ApiError,
    ) -> Result<PathBuf, SyncError> {
        let record = ConflictRecord {
            branch: self.branch,
            expected,
            diverged_head,
            backup_branch,
            error: error.to_string(),
            recorded_at: Utc::now(),
        };
        let path = self.conflicts_dir.join(format!("{backup_branch}.json"));
        atomic_write(&path, &serde_json::to_vec_pretty(&record)?)?;
        Ok(path)
    }
}
