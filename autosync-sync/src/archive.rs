//! Deleted-file archival.
//!
//! Before a deletion is pushed, the last remote content of the file is
//! copied into the local quarantine directory under a flattened name. The
//! tree builder then commits it as an addition under the quarantine path.

use std::path::{Path, PathBuf};

use autosync_core::RemoteBlobSet;
use autosync_remote::{ApiError, RemoteStore, RetryPolicy};

use crate::error::{io_err, SyncError};
use crate::paths::{flatten, PLACEHOLDER};
use crate::writer::atomic_write;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// `(original remote path, quarantine file)` pairs.
    pub archived: Vec<(String, PathBuf)>,
    /// Paths already gone from the remote (404).
    pub missing: Vec<String>,
    /// Paths whose content could not be read from the remote or written
    /// locally. They are dropped from the tree without a quarantine copy.
    pub failed: Vec<String>,
    pub placeholder_written: bool,
}

/// Archive every path in `deleted` as it exists at `reference`.
///
/// Transient remote failures that outlast `retry`, and rejected credentials,
/// abort the archival so the pipeline can be re-run. Content the remote
/// cannot serve is fetched again by blob id from `remote_blobs`; if that
/// fails too, or the local write fails, the path is logged and recorded in
/// [`ArchiveReport::failed`].
pub fn archive_deleted(
    remote: &dyn RemoteStore,
    reference: &str,
    deleted: &[String],
    remote_blobs: &RemoteBlobSet,
    quarantine_root: &Path,
    retry: &RetryPolicy,
) -> Result<ArchiveReport, SyncError> {
    let mut report = ArchiveReport::default();

    for path in deleted {
        let content = match fetch(remote, path, reference, remote_blobs.blob_sha(path), retry) {
            Ok(content) => content,
            Err(err) if aborts_archival(&err) => return Err(err.into()),
            Err(err) => {
                tracing::warn!("could not read {path} for archival: {err}");
                report.failed.push(path.clone());
                continue;
            }
        };
        let Some(content) = content else {
            tracing::debug!("{path} already gone from the remote; nothing to archive");
            report.missing.push(path.clone());
            continue;
        };

        let target = quarantine_root.join(flatten(path));
        match atomic_write(&target, &content) {
            Ok(()) => {
                tracing::info!("archived {path} -> {}", target.display());
                report.archived.push((path.clone(), target));
            }
            Err(err) => {
                tracing::warn!("could not archive {path}: {err}");
                report.failed.push(path.clone());
            }
        }
    }

    if !deleted.is_empty() && is_empty_dir(quarantine_root)? {
        atomic_write(&quarantine_root.join(PLACEHOLDER), b"")?;
        report.placeholder_written = true;
    }

    Ok(report)
}

fn fetch(
    remote: &dyn RemoteStore,
    path: &str,
    reference: &str,
    blob_sha: Option<&str>,
    retry: &RetryPolicy,
) -> Result<Option<Vec<u8>>, ApiError> {
    match retry.run("fetch deleted", || remote.file_content(path, reference)) {
        Err(err) if !aborts_archival(&err) => match blob_sha {
            Some(sha) => {
                tracing::debug!("{path}: {err}; retrying by blob id {sha}");
                retry.run("fetch deleted blob", || remote.blob_content(sha)).map(Some)
            }
            None => Err(err),
        },
        other => other,
    }
}

fn aborts_archival(err: &ApiError) -> bool {
    err.is_transient() || matches!(err, ApiError::Unauthorized { .. })
}

fn is_empty_dir(dir: &Path) -> Result<bool, SyncError> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(io_err(dir, err)),
    }
}
