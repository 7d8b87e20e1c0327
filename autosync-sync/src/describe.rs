//! Commit messages and follow-up comments.

use std::path::PathBuf;
use std::sync::Arc;

use autosync_remote::RemoteStore;
use chrono::Local;
use similar::{ChangeTag, TextDiff};

use crate::paths::flatten;

const MAX_LINES_PER_FILE: usize = 10;
const MAX_LINE_LENGTH: usize = 200;

/// Input for one description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeRequest {
    /// Local timestamp id of the run, `%Y%m%d%H%M%S`.
    pub commit_id: String,
    /// Commit the changes are relative to, if the branch existed.
    pub base_ref: Option<String>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl DescribeRequest {
    pub fn now(base_ref: Option<String>, added: &[String], modified: &[String], deleted: &[String]) -> Self {
        Self {
            commit_id: Local::now().format("%Y%m%d%H%M%S").to_string(),
            base_ref,
            added: added.to_vec(),
            modified: modified.to_vec(),
            deleted: deleted.to_vec(),
        }
    }
}

/// Produces the opaque strings attached to a push.
pub trait CommitDescriber: Send + Sync {
    fn commit_message(&self, request: &DescribeRequest) -> String;

    /// Body of the comment posted after the push; `None` posts nothing.
    fn comment_body(&self, request: &DescribeRequest) -> Option<String>;
}

/// `PUSH - [YYYY-mm-dd HH:MM]`.
fn timestamp_message() -> String {
    format!("PUSH - [{}]", Local::now().format("%Y-%m-%d %H:%M"))
}

/// Timestamp message only, no comment.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampDescriber;

impl CommitDescriber for TimestampDescriber {
    fn commit_message(&self, _request: &DescribeRequest) -> String {
        timestamp_message()
    }

    fn comment_body(&self, _request: &DescribeRequest) -> Option<String> {
        None
    }
}

/// Timestamp message plus a comment listing the changed files with a short
/// line-level diff of each.
pub struct DiffDescriber {
    root: PathBuf,
    quarantine_dir: String,
    remote: Arc<dyn RemoteStore>,
}

impl DiffDescriber {
    pub fn new(root: PathBuf, quarantine_dir: impl Into<String>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            root,
            quarantine_dir: quarantine_dir.into(),
            remote,
        }
    }

    fn local_text(&self, rel: &str) -> Option<String> {
        std::fs::read(self.root.join(rel))
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    fn remote_text(&self, rel: &str, base_ref: &str) -> Option<String> {
        match self.remote.file_content(rel, base_ref) {
            Ok(Some(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!("no remote text for {rel}: {err}");
                None
            }
        }
    }
}

impl CommitDescriber for DiffDescriber {
    fn commit_message(&self, _request: &DescribeRequest) -> String {
        timestamp_message()
    }

    fn comment_body(&self, request: &DescribeRequest) -> Option<String> {
        let mut out = format!("## Push {}\n", request.commit_id);

        if !request.added.is_empty() {
            out.push_str(&format!("\n### Added ({})\n", request.added.len()));
            for rel in &request.added {
                out.push_str(&format!("\n`{rel}`\n"));
                let text = self.local_text(rel).unwrap_or_default();
                push_lines(&mut out, diff_lines("", &text));
            }
        }

        if !request.modified.is_empty() {
            out.push_str(&format!("\n### Modified ({})\n", request.modified.len()));
            for rel in &request.modified {
                out.push_str(&format!("\n`{rel}`\n"));
                let old = request
                    .base_ref
                    .as_deref()
                    .and_then(|base| self.remote_text(rel, base))
                    .unwrap_or_default();
                let new = self.local_text(rel).unwrap_or_default();
                push_lines(&mut out, diff_lines(&old, &new));
            }
        }

        if !request.deleted.is_empty() {
            out.push_str(&format!("\n### Deleted ({})\n", request.deleted.len()));
            for rel in &request.deleted {
                out.push_str(&format!(
                    "\n`{rel}` archived as `{}/{}`\n",
                    self.quarantine_dir,
                    flatten(rel)
                ));
            }
        }

        Some(out)
    }
}

/// Changed lines, `*` for inserted and `-` for removed, capped per file.
pub fn diff_lines(old: &str, new: &str) -> Vec<String> {
    let diff = TextDiff::from_lines(old, new);
    diff.iter_all_changes()
        .filter_map(|change| {
            let marker = match change.tag() {
                ChangeTag::Insert => '*',
                ChangeTag::Delete => '-',
                ChangeTag::Equal => return None,
            };
            let line = change.value().trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                return None;
            }
            Some(format!("{marker} {}", truncate(line, MAX_LINE_LENGTH)))
        })
        .take(MAX_LINES_PER_FILE)
        .collect()
}

fn push_lines(out: &mut String, lines: Vec<String>) {
    if lines.is_empty() {
        return;
    }
    out.push_str("```\n");
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str("```\n");
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
