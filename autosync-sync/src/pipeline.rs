//! Shared push pipeline entrypoint used by the CLI and the daemon.
//!
//! One run: lock → snapshot → remote read → diff → archive deletions →
//! build tree → conflict check → push → schedule comment.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use autosync_core::{paths, ChangeSet, HeadRef, SyncConfig};
use autosync_remote::{RemoteStore, RetryPolicy};

use crate::archive::{archive_deleted, ArchiveReport};
use crate::conflict::{ConflictGuard, ConflictOutcome};
use crate::describe::{CommitDescriber, DescribeRequest, DiffDescriber};
use crate::error::SyncError;
use crate::history::History;
use crate::lock::{MarkerFile, PushLock, SingleFlight};
use crate::paths::PathRules;
use crate::push::{schedule_comment, PushOrchestrator, PushReport};
use crate::recovery::RecoveryHandler;
use crate::restore::RestoreReport;
use crate::tree::{TreeBuilder, TreeOutcome};
use crate::{diff, history, reader, restore, snapshot};

/// Why a run ended without pushing. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another run holds the push lock.
    Contended,
    /// Nothing to add, modify, or delete.
    NothingToSync,
    /// No valid tree entries survived filtering.
    NoTree,
}

#[derive(Debug)]
pub struct PushSummary {
    pub changes: ChangeSet,
    pub archive: ArchiveReport,
    pub conflict: ConflictOutcome,
    pub push: PushReport,
    pub uploaded: usize,
    pub reused: usize,
    /// The delayed comment thread; yields whether a comment was posted.
    pub comment: Option<JoinHandle<bool>>,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Pushed(PushSummary),
    Skipped(SkipReason),
}

impl PipelineOutcome {
    pub fn is_pushed(&self) -> bool {
        matches!(self, PipelineOutcome::Pushed(_))
    }

    /// One-line summary for logs and status output.
    pub fn describe(&self) -> String {
        match self {
            PipelineOutcome::Pushed(summary) => {
                let mut line = format!(
                    "pushed {} ({})",
                    reader::short(&summary.push.commit_sha),
                    summary.changes
                );
                if let ConflictOutcome::Diverged { backup_branch, .. } = &summary.conflict {
                    line.push_str(&format!("; diverged remote saved as {backup_branch}"));
                }
                line
            }
            PipelineOutcome::Skipped(SkipReason::Contended) => "skipped: push in progress".into(),
            PipelineOutcome::Skipped(SkipReason::NothingToSync) => "nothing to sync".into(),
            PipelineOutcome::Skipped(SkipReason::NoTree) => "skipped: no valid files".into(),
        }
    }
}

/// Read-only view of what a run would push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub head: Option<HeadRef>,
    pub changes: ChangeSet,
}

pub struct Pipeline {
    config: SyncConfig,
    rules: PathRules,
    remote: Arc<dyn RemoteStore>,
    describer: Arc<dyn CommitDescriber>,
    lock: PushLock,
    conflicts_dir: PathBuf,
    network_retry: RetryPolicy,
    backup_retry: RetryPolicy,
    comment_retry: RetryPolicy,
    recovery: Mutex<RecoveryHandler>,
}

impl Pipeline {
    /// A pipeline with its own in-process flag, the marker under `home`, and
    /// the diff-based describer.
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteStore>, home: &Path) -> Self {
        let marker = MarkerFile::new(paths::push_marker_path(home), config.lock_ttl());
        let describer = Arc::new(DiffDescriber::new(
            config.watched_root.clone(),
            config.quarantine_dir.clone(),
            remote.clone(),
        ));
        Self {
            rules: PathRules::from_config(&config),
            lock: PushLock::new(SingleFlight::new(), marker),
            conflicts_dir: paths::conflicts_dir(home),
            network_retry: RetryPolicy::from_settings(&config.push_retry),
            backup_retry: RetryPolicy::fixed(3, Duration::from_millis(2500)),
            comment_retry: RetryPolicy::fixed(5, Duration::from_secs(4)),
            recovery: Mutex::new(RecoveryHandler::from_settings(&config.recovery)),
            describer,
            remote,
            config,
        }
    }

    /// Share the in-process flag with other pipelines.
    pub fn with_flight(mut self, flight: Arc<SingleFlight>) -> Self {
        self.lock = PushLock::new(flight, self.lock.marker().clone());
        self
    }

    pub fn with_describer(mut self, describer: Arc<dyn CommitDescriber>) -> Self {
        self.describer = describer;
        self
    }

    /// Use `retry` for every network step, backups and comments included.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.network_retry = retry;
        self.backup_retry = retry;
        self.comment_retry = retry;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn rules(&self) -> &PathRules {
        &self.rules
    }

    /// A run from this process currently holds the push lock.
    pub fn is_running(&self) -> bool {
        self.lock.is_held()
    }

    /// Snapshot, read and diff without touching anything.
    pub fn plan(&self) -> Result<Plan, SyncError> {
        let local = self.snapshot()?;
        let remote = reader::read(self.remote.as_ref(), &self.config.branch, &self.network_retry)?;
        let changes = diff::compute(&local, &remote.blobs, &self.rules);
        Ok(Plan {
            head: remote.head,
            changes,
        })
    }

    /// Recent pushes of the configured branch and its backup branches.
    pub fn history(&self, limit: usize) -> Result<History, SyncError> {
        history::fetch(
            self.remote.as_ref(),
            &self.config.branch,
            &self.config.backup_branch_prefix,
            limit,
            &self.network_retry,
        )
    }

    /// Write the tree of `commit_sha` into `into`; the watched root is left
    /// alone.
    pub fn restore(&self, commit_sha: &str, into: &Path) -> Result<RestoreReport, SyncError> {
        restore::restore(self.remote.as_ref(), commit_sha, into, &self.network_retry)
    }

    /// One full pipeline run.
    pub fn run_once(&self) -> Result<PipelineOutcome, SyncError> {
        let Some(_guard) = self.lock.acquire()? else {
            return Ok(PipelineOutcome::Skipped(SkipReason::Contended));
        };
        let remote = self.remote.as_ref();
        let branch = self.config.branch.as_str();

        let local = self.snapshot()?;
        let state = reader::read(remote, branch, &self.network_retry)?;
        let changes = diff::compute(&local, &state.blobs, &self.rules);
        if changes.is_empty() {
            tracing::info!("nothing to sync ({} files unchanged)", changes.unchanged.len());
            return Ok(PipelineOutcome::Skipped(SkipReason::NothingToSync));
        }
        tracing::info!("changes: {changes}");

        let archive = match (&state.head, changes.deleted.is_empty()) {
            (Some(head), false) => archive_deleted(
                remote,
                &head.commit_sha,
                &changes.deleted,
                &state.blobs,
                &self.config.quarantine_root(),
                &self.network_retry,
            )?,
            _ => ArchiveReport::default(),
        };

        let builder = TreeBuilder::new(
            remote,
            &self.config.watched_root,
            &self.rules,
            self.network_retry,
        );
        let (tree_sha, uploaded, reused) = match builder.build(&changes, &state.blobs)? {
            TreeOutcome::Built {
                tree_sha,
                uploaded,
                reused,
                ..
            } => (tree_sha, uploaded, reused),
            TreeOutcome::NoTree => return Ok(PipelineOutcome::Skipped(SkipReason::NoTree)),
        };
        if state.head.as_ref().is_some_and(|head| head.tree_sha == tree_sha) {
            tracing::info!("built tree matches the remote; nothing to push");
            return Ok(PipelineOutcome::Skipped(SkipReason::NothingToSync));
        }

        let conflict = ConflictGuard::new(
            remote,
            branch,
            &self.config.backup_branch_prefix,
            self.conflicts_dir.clone(),
        )
        .with_retry(self.network_retry, self.backup_retry)
        .check(state.head.as_ref())?;

        let request = DescribeRequest::now(
            state.head.as_ref().map(|head| head.commit_sha.clone()),
            &changes.added,
            &changes.modified,
            &changes.deleted,
        );
        let message = self.describer.commit_message(&request);
        let push = PushOrchestrator::new(remote, branch, self.network_retry).push(&tree_sha, &message)?;

        let comment = Some(schedule_comment(
            self.remote.clone(),
            self.describer.clone(),
            push.commit_sha.clone(),
            request,
            self.config.comment_delay(),
            self.comment_retry,
        ));

        Ok(PipelineOutcome::Pushed(PushSummary {
            changes,
            archive,
            conflict,
            push,
            uploaded,
            reused,
            comment,
        }))
    }

    /// [`run_once`](Self::run_once) under the recovery handler.
    pub fn run_with_recovery(&self) -> Result<PipelineOutcome, SyncError> {
        let mut recovery = self
            .recovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        recovery.run(|| self.run_once())
    }

    fn snapshot(&self) -> Result<autosync_core::Snapshot, SyncError> {
        let rules = &self.rules;
        snapshot::build_filtered(
            &self.config.watched_root,
            rules.ignored_dir_names(),
            |rel| rules.is_tracked(rel),
        )
    }
}
