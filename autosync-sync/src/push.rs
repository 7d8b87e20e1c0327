//! Push orchestrator: commit the built tree and force the branch onto it.
//!
//! ```text
//! Idle -> ReadingHead -> Committing -> UpdatingRef -> Done
//!   \__________\______________\_____________\_______-> Failed
//! ```
//!
//! Every network step runs under the same [`RetryPolicy`]. A branch that does
//! not exist yet is created instead of updated (bootstrap).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use autosync_core::PushAttempt;
use autosync_remote::{ApiError, RemoteStore, RetryPolicy};

use crate::describe::{CommitDescriber, DescribeRequest};
use crate::error::SyncError;
use crate::reader::short;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Idle,
    ReadingHead,
    Committing,
    UpdatingRef,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub commit_sha: String,
    pub tree_sha: String,
    pub parent_sha: Option<String>,
    /// The branch was created by this push.
    pub bootstrapped: bool,
}

pub struct PushOrchestrator<'a> {
    remote: &'a dyn RemoteStore,
    branch: &'a str,
    retry: RetryPolicy,
    state: PushState,
    history: Vec<PushState>,
}

impl<'a> PushOrchestrator<'a> {
    pub fn new(remote: &'a dyn RemoteStore, branch: &'a str, retry: RetryPolicy) -> Self {
        Self {
            remote,
            branch,
            retry,
            state: PushState::Idle,
            history: vec![PushState::Idle],
        }
    }

    pub fn state(&self) -> PushState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[PushState] {
        &self.history
    }

    fn enter(&mut self, state: PushState) {
        tracing::debug!("push {:?} -> {state:?}", self.state);
        self.state = state;
        self.history.push(state);
    }

    /// Commit `tree_sha` on top of the current head and force the branch.
    pub fn push(&mut self, tree_sha: &str, commit_message: &str) -> Result<PushReport, SyncError> {
        match self.run(tree_sha, commit_message) {
            Ok(report) => {
                self.enter(PushState::Done);
                Ok(report)
            }
            Err(err) => {
                tracing::error!("push failed in {:?}: {err}", self.state);
                self.enter(PushState::Failed);
                Err(err)
            }
        }
    }

    fn run(&mut self, tree_sha: &str, commit_message: &str) -> Result<PushReport, SyncError> {
        self.enter(PushState::ReadingHead);
        let parent_sha = self
            .retry
            .run("read parent", || self.remote.branch_head(self.branch))?;
        let attempt = PushAttempt {
            tree_sha: tree_sha.to_string(),
            parent_sha,
            commit_message: commit_message.to_string(),
        };

        self.enter(PushState::Committing);
        let parents: Vec<String> = attempt.parent_sha.iter().cloned().collect();
        let commit_sha = self.retry.run("create commit", || {
            self.remote
                .create_commit(&attempt.tree_sha, &parents, &attempt.commit_message)
        })?;

        self.enter(PushState::UpdatingRef);
        let bootstrapped = attempt.parent_sha.is_none();
        if bootstrapped {
            self.retry.run("create branch", || {
                match self.remote.create_ref(self.branch, &commit_sha) {
                    // Someone else bootstrapped first; overwrite like any push.
                    Err(ApiError::AlreadyExists { .. }) => {
                        self.remote.update_ref(self.branch, &commit_sha, true)
                    }
                    other => other,
                }
            })?;
        } else {
            self.retry.run("update ref", || {
                self.remote.update_ref(self.branch, &commit_sha, true)
            })?;
        }

        tracing::info!(
            "pushed {} to {} (parent {})",
            short(&commit_sha),
            self.branch,
            attempt.parent_sha.as_deref().map(short).unwrap_or("none")
        );
        Ok(PushReport {
            commit_sha,
            tree_sha: attempt.tree_sha,
            parent_sha: attempt.parent_sha,
            bootstrapped,
        })
    }
}

/// Post a description of `commit_sha` after `delay` on a detached thread.
///
/// Failures are logged and never affect the push. The handle yields whether
/// a comment was posted.
pub fn schedule_comment(
    remote: Arc<dyn RemoteStore>,
    describer: Arc<dyn CommitDescriber>,
    commit_sha: String,
    request: DescribeRequest,
    delay: Duration,
    retry: RetryPolicy,
) -> JoinHandle<bool> {
    std::thread::spawn(move || {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let Some(body) = describer.comment_body(&request) else {
            return false;
        };
        let posted = retry.run_if(
            "post comment",
            |err: &ApiError| err.is_transient() || err.is_not_found(),
            || remote.comment_on_commit(&commit_sha, &body),
        );
        match posted {
            Ok(()) => {
                tracing::info!("posted description on {}", short(&commit_sha));
                true
            }
            Err(err) => {
                tracing::warn!("could not comment on {}: {err}", short(&commit_sha));
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use autosync_core::TreeEntry;
    use autosync_remote::{MemoryRemote, Operation};

    use super::*;

    fn tree(remote: &MemoryRemote, content: &[u8]) -> String {
        let blob = remote.create_blob(content).unwrap();
        remote.create_tree(&[TreeEntry::file("a.md", blob)]).unwrap()
    }

    #[test]
    fn bootstrap_creates_branch_without_parent() {
        let remote = MemoryRemote::new();
        let tree_sha = tree(&remote, b"first");
        let mut orchestrator = PushOrchestrator::new(&remote, "main", RetryPolicy::immediate(1));

        let report = orchestrator.push(&tree_sha, "PUSH").unwrap();
        assert!(report.bootstrapped);
        assert_eq!(report.parent_sha, None);
        assert_eq!(remote.branch_head("main").unwrap(), Some(report.commit_sha));
        assert_eq!(
            orchestrator.history(),
            &[
                PushState::Idle,
                PushState::ReadingHead,
                PushState::Committing,
                PushState::UpdatingRef,
                PushState::Done
            ]
        );
    }

    #[test]
    fn push_uses_current_head_as_parent() {
        let remote = MemoryRemote::new();
        let head = remote.push_foreign_commit("main", &[("a.md", b"old")]);
        let tree_sha = tree(&remote, b"new");

        let report = PushOrchestrator::new(&remote, "main", RetryPolicy::immediate(1))
            .push(&tree_sha, "PUSH")
            .unwrap();
        assert_eq!(report.parent_sha, Some(head.commit_sha.clone()));
        let commit = remote.commit_info(&report.commit_sha).unwrap();
        assert_eq!(commit.parents, vec![head.commit_sha]);
        assert_eq!(remote.branch_files("main")["a.md"], b"new");
    }

    #[test]
    fn transient_ref_failure_is_retried() {
        let remote = MemoryRemote::new();
        remote.push_foreign_commit("main", &[("a.md", b"old")]);
        let tree_sha = tree(&remote, b"new");
        remote.fail_next(
            Operation::UpdateRef,
            ApiError::Status {
                op: Operation::UpdateRef,
                status: 503,
                message: "unavailable".into(),
            },
            2,
        );

        PushOrchestrator::new(&remote, "main", RetryPolicy::immediate(3))
            .push(&tree_sha, "PUSH")
            .unwrap();
        assert_eq!(remote.call_count(Operation::UpdateRef), 3);
    }

    #[test]
    fn definitive_rejection_fails_without_retry() {
        let remote = MemoryRemote::new();
        remote.push_foreign_commit("main", &[("a.md", b"old")]);
        let tree_sha = tree(&remote, b"new");
        remote.fail_next(
            Operation::CreateCommit,
            ApiError::Unauthorized {
                op: Operation::CreateCommit,
                status: 403,
                message: "Resource not accessible".into(),
            },
            1,
        );

        let mut orchestrator = PushOrchestrator::new(&remote, "main", RetryPolicy::immediate(3));
        assert!(orchestrator.push(&tree_sha, "PUSH").is_err());
        assert_eq!(orchestrator.state(), PushState::Failed);
        assert_eq!(remote.call_count(Operation::CreateCommit), 1);
        assert_eq!(remote.call_count(Operation::UpdateRef), 0);
    }
}
