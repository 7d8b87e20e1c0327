//! Restore a pushed version of the folder into a directory of its own.
//!
//! The live watched root is never touched: a version lands in an empty
//! directory (by default under `~/.autosync/versions/`) and the user copies
//! back what they need.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use autosync_remote::{EntryKind, RemoteStore, RetryPolicy};

use crate::error::{io_err, SyncError};
use crate::paths::is_malformed;
use crate::reader::short;
use crate::writer::atomic_write;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub commit_sha: String,
    pub dir: PathBuf,
    pub written: Vec<String>,
    /// Tree paths that could not be placed safely under `dir`.
    pub skipped: Vec<String>,
}

/// `<short sha>_<YYYYmmdd-HHMMSS>`, the folder name of a restored version.
pub fn version_dir_name<Tz: TimeZone>(commit_sha: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}", short(commit_sha), at.format("%Y%m%d-%H%M%S"))
}

/// Write every blob of `commit_sha`'s tree below `into`.
///
/// `into` may be missing or empty; anything else is refused before the remote
/// is contacted.
pub fn restore(
    remote: &dyn RemoteStore,
    commit_sha: &str,
    into: &Path,
    retry: &RetryPolicy,
) -> Result<RestoreReport, SyncError> {
    ensure_empty(into)?;

    let commit = retry.run("read commit", || remote.commit(commit_sha))?;
    let listing = retry.run("read tree", || remote.tree_listing(&commit.tree_sha))?;

    let mut report = RestoreReport {
        commit_sha: commit.sha.clone(),
        dir: into.to_path_buf(),
        ..RestoreReport::default()
    };
    std::fs::create_dir_all(into).map_err(|e| io_err(into, e))?;

    for entry in listing.into_iter().filter(|e| e.kind == EntryKind::Blob) {
        if is_malformed(&entry.path) {
            tracing::warn!("not restoring {:?}: unsafe path", entry.path);
            report.skipped.push(entry.path);
            continue;
        }
        let content = retry.run("read blob", || remote.blob_content(&entry.sha))?;
        atomic_write(&into.join(&entry.path), &content)?;
        report.written.push(entry.path);
    }

    tracing::info!(
        "restored {} ({} files) into {}",
        short(&report.commit_sha),
        report.written.len(),
        into.display()
    );
    Ok(report)
}

fn ensure_empty(dir: &Path) -> Result<(), SyncError> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_err(dir, err)),
    };
    if entries.next().is_some() {
        return Err(SyncError::TargetNotEmpty {
            path: dir.to_path_buf(),
        });
    }
    Ok(())
}
