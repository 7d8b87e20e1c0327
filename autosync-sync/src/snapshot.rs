//! Local snapshot builder.
//!
//! Walks the watched root once per pipeline run and fingerprints every
//! regular file. A file that cannot be read is logged and left out; only a
//! missing root fails the whole snapshot.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use autosync_core::{FileRecord, Snapshot};
use autosync_remote::BlobHasher;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use crate::error::{io_err, SyncError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Snapshot every file under `root`, skipping ignored directories.
pub fn build(root: &Path, ignored_dir_names: &[String]) -> Result<Snapshot, SyncError> {
    build_filtered(root, ignored_dir_names, |_| true)
}

/// Like [`build`], fingerprinting only relative paths accepted by `keep`.
pub fn build_filtered<F>(
    root: &Path,
    ignored_dir_names: &[String],
    keep: F,
) -> Result<Snapshot, SyncError>
where
    F: Fn(&str) -> bool,
{
    let meta = std::fs::metadata(root).map_err(|e| io_err(root, e))?;
    if !meta.is_dir() {
        return Err(io_err(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "watched root is not a directory"),
        ));
    }

    let mut snapshot = Snapshot::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry, ignored_dir_names));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_path(root, entry.path()) else {
            tracing::warn!("skipping non UTF-8 path: {}", entry.path().display());
            continue;
        };
        if !keep(&relative) {
            continue;
        }
        match fingerprint(entry.path(), relative.clone()) {
            Ok(Some(record)) => {
                snapshot.insert(relative, record);
            }
            Ok(None) => tracing::warn!("skipping {relative}: changed while reading"),
            Err(err) => tracing::warn!("skipping {relative}: {err}"),
        }
    }

    tracing::debug!("snapshot of {}: {} files", root.display(), snapshot.len());
    Ok(snapshot)
}

/// Hash one file in fixed-size chunks. `Ok(None)` when the length changed
/// between `stat` and the end of the read.
pub fn fingerprint(path: &Path, relative_path: String) -> std::io::Result<Option<FileRecord>> {
    let mut file = File::open(path)?;
    let meta = file.metadata()?;
    let size = meta.len();
    let mtime: DateTime<Utc> = meta.modified()?.into();

    let mut sha = Sha256::new();
    let mut blob = BlobHasher::new(size);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
        blob.update(&buf[..n]);
    }

    let Some(blob_id) = blob.finish() else {
        return Ok(None);
    };
    Ok(Some(FileRecord {
        relative_path,
        mtime,
        size,
        content_hash: hex::encode(sha.finalize()),
        blob_id,
    }))
}

/// `/`-joined path of `path` below `root`.
pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    let joined = parts?.join("/");
    (!joined.is_empty()).then_some(joined)
}

fn is_ignored_dir(entry: &DirEntry, ignored_dir_names: &[String]) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| ignored_dir_names.iter().any(|ignored| ignored == name))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use filetime::FileTime;
    use tempfile::TempDir;

    use super::*;

    fn ignored() -> Vec<String> {
        vec![".obsidian".to_string(), "__pycache__".to_string()]
    }

    #[test]
    fn records_nested_files_with_forward_slashes() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("notes/daily")).unwrap();
        fs::write(root.path().join("notes/daily/today.md"), "# today\n").unwrap();
        fs::write(root.path().join("index.md"), "index").unwrap();

        let snapshot = build(root.path(), &ignored()).unwrap();
        let keys: Vec<&str> = snapshot.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["index.md", "notes/daily/today.md"]);
    }

    #[test]
    fn ignored_directories_are_not_walked() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join(".obsidian")).unwrap();
        fs::write(root.path().join(".obsidian/app.json"), "{}").unwrap();
        fs::write(root.path().join("a.md"), "a").unwrap();

        let snapshot = build(root.path(), &ignored()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("a.md"));
    }

    #[test]
    fn fingerprint_carries_size_mtime_and_both_hashes() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("hello.md");
        fs::write(&path, "hello world\n").unwrap();
        let stamp = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&path, stamp).unwrap();

        let record = fingerprint(&path, "hello.md".into()).unwrap().unwrap();
        assert_eq!(record.size, 12);
        assert_eq!(record.mtime.timestamp(), 1_700_000_000);
        assert_eq!(record.blob_id, "3b18e512dba79e4c8300dd08aeb37f8e728b8dad");
        assert_eq!(
            record.content_hash,
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        );
    }

    #[test]
    fn large_files_hash_across_chunks() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("big.md");
        let content = vec![b'x'; CHUNK_SIZE * 2 + 17];
        fs::write(&path, &content).unwrap();

        let record = fingerprint(&path, "big.md".into()).unwrap().unwrap();
        assert_eq!(record.blob_id, autosync_remote::blob_id(&content));
    }

    #[test]
    fn filter_limits_what_is_hashed() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.md"), "a").unwrap();
        fs::write(root.path().join("b.png"), "b").unwrap();

        let snapshot = build_filtered(root.path(), &[], |rel| rel.ends_with(".md")).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let root = TempDir::new().unwrap();
        let err = build(&root.path().join("gone"), &[]).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_skipped_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let locked = root.path().join("locked.md");
        fs::write(&locked, "secret").unwrap();
        fs::write(root.path().join("open.md"), "open").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let snapshot = build(root.path(), &[]).unwrap();
        assert!(snapshot.contains_key("open.md"));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    }
}
