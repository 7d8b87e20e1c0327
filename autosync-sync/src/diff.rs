//! Diff engine: local snapshot against the remote listing.

use autosync_core::{ChangeSet, RemoteBlobSet, Snapshot};

use crate::paths::PathRules;

/// Classify every tracked path.
///
/// - local only → `added`
/// - both sides, local blob id equals the listed sha → `unchanged`
/// - both sides otherwise (including a listing without shas) → `modified`
/// - remote only → `deleted`
///
/// Paths the rules do not track (quarantine, ignored directories, other
/// extensions) appear in no list.
pub fn compute(local: &Snapshot, remote: &RemoteBlobSet, rules: &PathRules) -> ChangeSet {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut unchanged = Vec::new();

    for (path, record) in local.iter().filter(|(path, _)| rules.is_tracked(path)) {
        if !remote.contains(path) {
            added.push(path.clone());
        } else if remote.blob_sha(path) == Some(record.blob_id.as_str()) {
            unchanged.push(path.clone());
        } else {
            modified.push(path.clone());
        }
    }

    let deleted = remote
        .paths()
        .filter(|path| rules.is_tracked(path) && !local.contains_key(*path))
        .map(str::to_string)
        .collect();

    ChangeSet::from_parts(added, modified, deleted, unchanged)
}

#[cfg(test)]
mod tests {
    use autosync_core::FileRecord;
    use chrono::Utc;

    use super::*;

    fn rules() -> PathRules {
        PathRules::new(vec![".md".into()], vec![".obsidian".into()], "deleted_files")
    }

    fn record(path: &str, content: &[u8]) -> (String, FileRecord) {
        (
            path.to_string(),
            FileRecord {
                relative_path: path.to_string(),
                mtime: Utc::now(),
                size: content.len() as u64,
                content_hash: String::new(),
                blob_id: autosync_remote::blob_id(content),
            },
        )
    }

    #[test]
    fn classifies_each_side() {
        let local: Snapshot = [record("new.md", b"n"), record("same.md", b"s"), record("edit.md", b"v2")]
            .into_iter()
            .collect();
        let remote: RemoteBlobSet = [
            ("same.md".to_string(), Some(autosync_remote::blob_id(b"s"))),
            ("edit.md".to_string(), Some(autosync_remote::blob_id(b"v1"))),
            ("gone.md".to_string(), Some("00".to_string())),
        ]
        .into_iter()
        .collect();

        let cs = compute(&local, &remote, &rules());
        assert_eq!(cs.added, vec!["new.md"]);
        assert_eq!(cs.modified, vec!["edit.md"]);
        assert_eq!(cs.deleted, vec!["gone.md"]);
        assert_eq!(cs.unchanged, vec!["same.md"]);
    }

    #[test]
    fn listing_without_shas_treats_presence_as_modified() {
        let local: Snapshot = [record("a.md", b"a")].into_iter().collect();
        let remote: RemoteBlobSet = vec!["a.md".to_string()].into_iter().collect();
        assert_eq!(compute(&local, &remote, &rules()).modified, vec!["a.md"]);
    }

    #[test]
    fn quarantine_is_never_deleted() {
        let local = Snapshot::new();
        let remote: RemoteBlobSet = vec![
            "deleted_files/notes_a.md".to_string(),
            "deleted_files/.gitkeep".to_string(),
        ]
        .into_iter()
        .collect();
        assert!(compute(&local, &remote, &rules()).is_empty());
    }

    #[test]
    fn untracked_remote_files_are_invisible() {
        let remote: RemoteBlobSet = vec![
            "image.png".to_string(),
            ".obsidian/workspace.md".to_string(),
            "sub/.obsidian/x.md".to_string(),
        ]
        .into_iter()
        .collect();
        assert!(compute(&Snapshot::new(), &remote, &rules()).is_empty());
    }
}
