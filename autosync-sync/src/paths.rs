//! Path rules shared by the diff engine, the tree builder and the watcher.
//!
//! All paths here are `/`-separated and relative to the watched root.

use autosync_core::SyncConfig;

/// Marker written into an otherwise empty quarantine directory.
pub const PLACEHOLDER: &str = ".gitkeep";

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];
const FORBIDDEN_COMPONENTS: &[&str] = &[".git", ".obsidian", "__MACOSX"];
const TRANSIENT_SUFFIXES: &[&str] = &[".lock", ".tmp", "~"];

/// Collapse `./`, `//` and `..` segments. `None` when the result is empty or
/// would escape the root.
pub fn normalize(rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// True for paths no tree may contain.
pub fn is_malformed(rel: &str) -> bool {
    if rel.is_empty() || rel.starts_with('/') || rel.ends_with('/') || rel.contains("//") {
        return true;
    }
    if rel
        .chars()
        .any(|c| c.is_control() || FORBIDDEN_CHARS.contains(&c))
    {
        return true;
    }
    rel.split('/')
        .any(|part| part == "." || part == ".." || FORBIDDEN_COMPONENTS.contains(&part))
}

/// Editor swap files and lock files.
pub fn is_transient_artifact(rel: &str) -> bool {
    let lower = rel.to_ascii_lowercase();
    TRANSIENT_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Case-insensitive suffix match against the allow-list (entries like `.md`).
pub fn is_allowed_extension(rel: &str, allowlist: &[String]) -> bool {
    let name = file_name(rel).to_ascii_lowercase();
    allowlist
        .iter()
        .any(|ext| name.len() > ext.len() && name.ends_with(&ext.to_ascii_lowercase()))
}

pub fn is_quarantined(rel: &str, quarantine_dir: &str) -> bool {
    rel == quarantine_dir
        || rel
            .strip_prefix(quarantine_dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// `notes/a.md` → `notes_a.md`.
pub fn flatten(rel: &str) -> String {
    rel.replace(['/', '\\'], "_")
}

fn file_name(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

/// The filters of one configuration, bundled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRules {
    allowlist: Vec<String>,
    ignored_dir_names: Vec<String>,
    quarantine_dir: String,
}

impl PathRules {
    pub fn new(allowlist: Vec<String>, ignored_dir_names: Vec<String>, quarantine_dir: impl Into<String>) -> Self {
        Self {
            allowlist,
            ignored_dir_names,
            quarantine_dir: quarantine_dir.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.extension_allowlist.clone(),
            config.ignored_dir_names.clone(),
            config.quarantine_dir.clone(),
        )
    }

    pub fn quarantine_dir(&self) -> &str {
        &self.quarantine_dir
    }

    pub fn ignored_dir_names(&self) -> &[String] {
        &self.ignored_dir_names
    }

    /// Any directory component is on the ignore list.
    pub fn is_ignored(&self, rel: &str) -> bool {
        let mut parts: Vec<&str> = rel.split('/').collect();
        parts.pop();
        parts
            .iter()
            .any(|part| self.ignored_dir_names.iter().any(|ignored| ignored == part))
    }

    pub fn is_quarantined(&self, rel: &str) -> bool {
        is_quarantined(rel, &self.quarantine_dir)
    }

    pub fn allows_extension(&self, rel: &str) -> bool {
        is_allowed_extension(rel, &self.allowlist)
    }

    /// Visible to the diff engine: a well-formed, allow-listed user file
    /// outside the quarantine and ignored directories.
    pub fn is_tracked(&self, rel: &str) -> bool {
        !is_malformed(rel)
            && !self.is_quarantined(rel)
            && !self.is_ignored(rel)
            && !is_transient_artifact(rel)
            && is_allowed_extension(rel, &self.allowlist)
    }

    /// A quarantine file the tree builder should carry.
    pub fn is_quarantine_file(&self, rel: &str) -> bool {
        if is_malformed(rel) || !self.is_quarantined(rel) || is_transient_artifact(rel) {
            return false;
        }
        file_name(rel) == PLACEHOLDER || is_allowed_extension(rel, &self.allowlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PathRules {
        PathRules::new(
            vec![".md".into(), ".json".into()],
            vec![".vscode".into(), "__pycache__".into()],
            "deleted_files",
        )
    }

    #[test]
    fn normalize_collapses_dots_and_slashes() {
        assert_eq!(normalize("./notes//a.md").as_deref(), Some("notes/a.md"));
        assert_eq!(normalize("/notes/x/../a.md").as_deref(), Some("notes/a.md"));
        assert_eq!(normalize("../escape.md"), None);
        assert_eq!(normalize("./"), None);
    }

    #[test]
    fn malformed_paths_are_detected() {
        for bad in [
            "",
            "/abs.md",
            "dir/",
            "a//b.md",
            "a/../b.md",
            "what?.md",
            "tab\there.md",
            "a\\b.md",
            ".git/config.md",
            "x/.obsidian/app.json",
            "__MACOSX/a.md",
        ] {
            assert!(is_malformed(bad), "{bad:?} should be malformed");
        }
        assert!(!is_malformed("notes/2024 plan.md"));
        assert!(!is_malformed(".hidden/notes.md"));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let allow = vec![".md".to_string()];
        assert!(is_allowed_extension("A/README.MD", &allow));
        assert!(!is_allowed_extension("a/readme.txt", &allow));
        assert!(!is_allowed_extension(".md", &allow));
    }

    #[test]
    fn transient_artifacts() {
        assert!(is_transient_artifact("a.md.tmp"));
        assert!(is_transient_artifact("push.LOCK"));
        assert!(is_transient_artifact("a.md~"));
        assert!(!is_transient_artifact("template.md"));
    }

    #[test]
    fn flatten_replaces_separators() {
        assert_eq!(flatten("notes/a.md"), "notes_a.md");
        assert_eq!(flatten("a\\b/c.json"), "a_b_c.json");
    }

    #[test]
    fn quarantine_prefix_is_component_aware() {
        assert!(is_quarantined("deleted_files/a.md", "deleted_files"));
        assert!(!is_quarantined("deleted_files_old/a.md", "deleted_files"));
    }

    #[test]
    fn tracked_excludes_quarantine_and_ignored_dirs() {
        let rules = rules();
        assert!(rules.is_tracked("notes/a.md"));
        assert!(!rules.is_tracked("deleted_files/notes_a.md"));
        assert!(!rules.is_tracked(".vscode/settings.json"));
        assert!(!rules.is_tracked("image.png"));
    }

    #[test]
    fn placeholder_counts_as_quarantine_file() {
        let rules = rules();
        assert!(rules.is_quarantine_file("deleted_files/.gitkeep"));
        assert!(rules.is_quarantine_file("deleted_files/notes_a.md"));
        assert!(!rules.is_quarantine_file("deleted_files/photo.png"));
        assert!(!rules.is_quarantine_file("notes/a.md"));
    }
}
