//! Push history: the latest commits of the mirrored branch, the descriptions
//! posted on them and the backup branches left behind by diverged runs.

use serde::Serialize;

use autosync_remote::{BranchInfo, CommitSummary, RemoteStore, RetryPolicy};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub commit: CommitSummary,
    /// Push descriptions posted as commit comments, oldest first.
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    pub branch: String,
    /// Newest first.
    pub entries: Vec<HistoryEntry>,
    pub backups: Vec<BranchInfo>,
}

/// Read up to `limit` commits of `branch` with their comments, and every
/// branch whose name starts with `backup_prefix`.
///
/// A branch that does not exist yet has an empty history.
pub fn fetch(
    remote: &dyn RemoteStore,
    branch: &str,
    backup_prefix: &str,
    limit: usize,
    retry: &RetryPolicy,
) -> Result<History, SyncError> {
    let commits = retry.run("list commits", || remote.list_commits(branch, limit))?;
    let mut entries = Vec::with_capacity(commits.len());
    for commit in commits {
        let comments = retry.run("read comments", || remote.commit_comments(&commit.sha))?;
        entries.push(HistoryEntry { commit, comments });
    }

    let backups: Vec<BranchInfo> = retry
        .run("list branches", || remote.list_branches())?
        .into_iter()
        .filter(|info| info.name != branch && info.name.starts_with(backup_prefix))
        .collect();
    tracing::debug!(
        "history of {branch}: {} commits, {} backup branches",
        entries.len(),
        backups.len()
    );

    Ok(History {
        branch: branch.to_string(),
        entries,
        backups,
    })
}
