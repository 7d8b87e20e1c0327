//! Atomic file writes for quarantine content, markers and records.

use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

/// Write `content` to `path` via a `.autosync.tmp` sibling and a rename, so a
/// reader never sees a half-written file.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<(), SyncError> {
    let tmp = PathBuf::from(format!("{}.autosync.tmp", path.display()));
    atomic_write_with_tmp(path, content, &tmp)
}

fn atomic_write_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn creates_parent_directories() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("deleted_files/notes_a.md");
        atomic_write(&path, b"archived").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"archived");
    }

    #[test]
    fn tmp_file_removed_after_write() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("a.md");
        atomic_write(&path, b"x").unwrap();
        assert!(!root.path().join("a.md.autosync.tmp").exists());
    }

    #[test]
    fn overwrites_existing_content() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("a.md");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        let root = TempDir::new().unwrap();
        let target_dir = root.path().join("target");
        fs::create_dir_all(&target_dir).unwrap();
        let path = target_dir.join("file.md");
        fs::write(&path, "original").unwrap();

        // Renaming a file over a non-empty directory fails.
        let blocker = target_dir.join("blocker.md");
        fs::create_dir_all(blocker.join("inner")).unwrap();

        let tmp_dir = TempDir::new().unwrap();
        let tmp_path = tmp_dir.path().join("file.md.autosync.tmp");
        let err = atomic_write_with_tmp(&blocker, b"new content", &tmp_path);
        assert!(err.is_err(), "rename onto a directory should fail");

        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        assert!(!tmp_path.exists(), ".autosync.tmp should be cleaned up");
    }
}
