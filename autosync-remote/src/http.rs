//! [`RemoteStore`] over a GitHub-compatible REST API.

use std::time::Duration;

use autosync_core::{SyncConfig, TreeEntry};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{
    BranchInfo, CommitInfo, CommitSummary, EntryKind, Operation, RemoteEntry, RemoteStore,
};
use crate::error::ApiError;

const ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("autosync/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP client bound to one `owner/repo`.
pub struct HttpRemote {
    agent: ureq::Agent,
    api_base: String,
    owner: String,
    repo: String,
    token: String,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("api_base", &self.api_base)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        api_base: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            &config.api_base,
            &config.username,
            &config.repo,
            &config.token,
            config.request_timeout(),
        )
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_base, self.owner, self.repo, tail)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &format!("token {}", self.token))
            .set("Accept", ACCEPT)
            .set("User-Agent", USER_AGENT)
    }

    fn send(
        &self,
        op: Operation,
        request: ureq::Request,
        body: Option<Value>,
    ) -> Result<ureq::Response, ApiError> {
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(map_status(op, status, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(ApiError::Transport {
                op,
                message: transport.to_string(),
            }),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, op: Operation, url: &str) -> Result<T, ApiError> {
        let response = self.send(op, self.request("GET", url), None)?;
        decode(op, response)
    }

    /// List `tree_sha` one level at a time. Used when the recursive listing
    /// comes back truncated; a level that is itself truncated is an error.
    fn walk_tree(
        &self,
        tree_sha: &str,
        prefix: &str,
        out: &mut Vec<RemoteEntry>,
    ) -> Result<(), ApiError> {
        let op = Operation::TreeListing;
        let body: TreeBody = self.get_json(op, &self.url(&format!("git/trees/{tree_sha}")))?;
        if body.truncated {
            return Err(ApiError::Truncated {
                op,
                tree_sha: tree_sha.to_string(),
            });
        }
        for item in body.tree {
            let path = if prefix.is_empty() {
                item.path
            } else {
                format!("{prefix}/{}", item.path)
            };
            let entry = to_entry(path, item.sha, &item.kind);
            if entry.kind == EntryKind::Tree {
                self.walk_tree(&entry.sha, &entry.path, out)?;
            }
            out.push(entry);
        }
        Ok(())
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        op: Operation,
        url: &str,
        body: Value,
    ) -> Result<T, ApiError> {
        let response = self.send(op, self.request("POST", url), Some(body))?;
        decode(op, response)
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Deserialize)]
struct RefBody {
    object: ShaOnly,
}

#[derive(Deserialize)]
struct CommitBody {
    sha: String,
    tree: ShaOnly,
    #[serde(default)]
    parents: Vec<ShaOnly>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TreeBody {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Shared by the contents and git/blobs endpoints.
#[derive(Deserialize)]
struct ContentBody {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct CommitListItem {
    sha: String,
    commit: CommitListDetail,
}

#[derive(Deserialize)]
struct CommitListDetail {
    #[serde(default)]
    message: String,
    committer: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CommentItem {
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
struct BranchItem {
    name: String,
    commit: ShaOnly,
}

// ---------------------------------------------------------------------------
// RemoteStore
// ---------------------------------------------------------------------------

impl RemoteStore for HttpRemote {
    fn branch_head(&self, branch: &str) -> Result<Option<String>, ApiError> {
        let op = Operation::BranchHead;
        let url = self.url(&format!("git/ref/heads/{}", encode_path(branch)));
        match self.get_json::<RefBody>(op, &url) {
            Ok(body) => Ok(Some(body.object.sha)),
            Err(ApiError::NotFound { .. }) => Ok(None),
            // An empty repository answers git-data reads with 409.
            Err(ApiError::Rejected { status: 409, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn commit(&self, sha: &str) -> Result<CommitInfo, ApiError> {
        let body: CommitBody = self.get_json(Operation::Commit, &self.url(&format!("git/commits/{sha}")))?;
        Ok(CommitInfo {
            sha: body.sha,
            tree_sha: body.tree.sha,
            parents: body.parents.into_iter().map(|p| p.sha).collect(),
            message: body.message,
        })
    }

    fn tree_listing(&self, tree_sha: &str) -> Result<Vec<RemoteEntry>, ApiError> {
        let op = Operation::TreeListing;
        let body: TreeBody =
            self.get_json(op, &self.url(&format!("git/trees/{tree_sha}?recursive=1")))?;
        if body.truncated {
            tracing::warn!("recursive listing of {tree_sha} was truncated; walking it level by level");
            let mut entries = Vec::new();
            self.walk_tree(tree_sha, "", &mut entries)?;
            return Ok(entries);
        }
        Ok(body
            .tree
            .into_iter()
            .map(|item| to_entry(item.path, item.sha, &item.kind))
            .collect())
    }

    fn file_content(&self, path: &str, reference: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let op = Operation::FileContent;
        let url = self.url(&format!("contents/{}", encode_path(path)));
        let request = self.request("GET", &url).query("ref", reference);
        let response = match self.send(op, request, None) {
            Ok(response) => response,
            Err(ApiError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let body: ContentBody = decode(op, response)?;
        if body.encoding.is_empty() || body.encoding == "base64" {
            return decode_base64(&body.content)
                .map(Some)
                .map_err(|message| ApiError::Decode { op, message });
        }
        // Files over 1 MB come back with encoding "none" and no content.
        match body.sha {
            Some(sha) => {
                tracing::debug!("{path} is served as '{}'; fetching blob {sha}", body.encoding);
                self.blob_content(&sha).map(Some)
            }
            None => Err(ApiError::Decode {
                op,
                message: format!("unsupported content encoding '{}'", body.encoding),
            }),
        }
    }

    fn blob_content(&self, sha: &str) -> Result<Vec<u8>, ApiError> {
        let op = Operation::BlobContent;
        let body: ContentBody = self.get_json(op, &self.url(&format!("git/blobs/{sha}")))?;
        if body.encoding != "base64" {
            return Err(ApiError::Decode {
                op,
                message: format!("unsupported blob encoding '{}'", body.encoding),
            });
        }
        decode_base64(&body.content).map_err(|message| ApiError::Decode { op, message })
    }

    fn list_commits(&self, branch: &str, limit: usize) -> Result<Vec<CommitSummary>, ApiError> {
        let op = Operation::ListCommits;
        let per_page = limit.clamp(1, 100).to_string();
        let request = self
            .request("GET", &self.url("commits"))
            .query("sha", branch)
            .query("per_page", &per_page);
        let response = match self.send(op, request, None) {
            Ok(response) => response,
            Err(ApiError::NotFound { .. }) | Err(ApiError::Rejected { status: 409, .. }) => {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err),
        };
        let items: Vec<CommitListItem> = decode(op, response)?;
        Ok(items
            .into_iter()
            .take(limit)
            .map(|item| CommitSummary {
                sha: item.sha,
                message: item.commit.message,
                committed_at: item.commit.committer.and_then(|c| c.date),
            })
            .collect())
    }

    fn commit_comments(&self, sha: &str) -> Result<Vec<String>, ApiError> {
        let op = Operation::CommitComments;
        let items: Vec<CommentItem> =
            self.get_json(op, &self.url(&format!("commits/{sha}/comments")))?;
        Ok(items.into_iter().map(|item| item.body).collect())
    }

    fn list_branches(&self) -> Result<Vec<BranchInfo>, ApiError> {
        let op = Operation::ListBranches;
        let mut branches = Vec::new();
        for page in 1.. {
            let request = self
                .request("GET", &self.url("branches"))
                .query("per_page", "100")
                .query("page", &page.to_string());
            let items: Vec<BranchItem> = decode(op, self.send(op, request, None)?)?;
            let last = items.len() < 100;
            branches.extend(items.into_iter().map(|item| BranchInfo {
                name: item.name,
                commit_sha: item.commit.sha,
            }));
            if last {
                break;
            }
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    fn create_blob(&self, content: &[u8]) -> Result<String, ApiError> {
        let body = json!({ "content": STANDARD.encode(content), "encoding": "base64" });
        let created: ShaOnly = self.post_json(Operation::CreateBlob, &self.url("git/blobs"), body)?;
        Ok(created.sha)
    }

    fn create_tree(&self, entries: &[TreeEntry]) -> Result<String, ApiError> {
        let tree: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "mode": entry.mode,
                    "type": "blob",
                    "sha": entry.blob_sha,
                })
            })
            .collect();
        let created: ShaOnly =
            self.post_json(Operation::CreateTree, &self.url("git/trees"), json!({ "tree": tree }))?;
        Ok(created.sha)
    }

    fn create_commit(
        &self,
        tree_sha: &str,
        parents: &[String],
        message: &str,
    ) -> Result<String, ApiError> {
        let body = json!({ "message": message, "tree": tree_sha, "parents": parents });
        let created: ShaOnly =
            self.post_json(Operation::CreateCommit, &self.url("git/commits"), body)?;
        Ok(created.sha)
    }

    fn update_ref(&self, branch: &str, sha: &str, force: bool) -> Result<(), ApiError> {
        let op = Operation::UpdateRef;
        let url = self.url(&format!("git/refs/heads/{}", encode_path(branch)));
        let body = json!({ "sha": sha, "force": force });
        match self.send(op, self.request("PATCH", &url), Some(body)) {
            Ok(_) => Ok(()),
            Err(ApiError::Rejected { status: 422, message, .. })
                if message.contains("does not exist") =>
            {
                Err(ApiError::NotFound {
                    op,
                    what: format!("reference refs/heads/{branch}"),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn create_ref(&self, branch: &str, sha: &str) -> Result<(), ApiError> {
        let op = Operation::CreateRef;
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        match self.send(op, self.request("POST", &self.url("git/refs")), Some(body)) {
            Ok(_) => Ok(()),
            Err(err) => Err(classify_create_ref(branch, err)),
        }
    }

    fn comment_on_commit(&self, sha: &str, body: &str) -> Result<(), ApiError> {
        let op = Operation::CommentOnCommit;
        let url = self.url(&format!("commits/{sha}/comments"));
        self.send(op, self.request("POST", &url), Some(json!({ "body": body })))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode<T: DeserializeOwned>(op: Operation, response: ureq::Response) -> Result<T, ApiError> {
    response.into_json::<T>().map_err(|e| ApiError::Decode {
        op,
        message: e.to_string(),
    })
}

fn to_entry(path: String, sha: String, kind: &str) -> RemoteEntry {
    RemoteEntry {
        kind: match kind {
            "tree" => EntryKind::Tree,
            "commit" => EntryKind::Commit,
            _ => EntryKind::Blob,
        },
        path,
        sha,
    }
}

/// Ref creation answers 422 both for a taken name and for an invalid name
/// or unknown object; only the first means the ref is there.
pub(crate) fn classify_create_ref(branch: &str, err: ApiError) -> ApiError {
    match err {
        ApiError::Rejected {
            status: 422,
            ref message,
            ..
        } if message.to_ascii_lowercase().contains("already exists") => ApiError::AlreadyExists {
            name: branch.to_string(),
        },
        other => other,
    }
}

/// Classify a non-2xx response.
pub(crate) fn map_status(op: Operation, status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status {
        401 | 403 => ApiError::Unauthorized { op, status, message },
        404 => ApiError::NotFound { op, what: message },
        400 | 409 | 422 => ApiError::Rejected { op, status, message },
        _ => ApiError::Status { op, status, message },
    }
}

/// Percent-encode each `/`-separated segment.
pub(crate) fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Content API payloads wrap base64 at 60 columns.
pub(crate) fn decode_base64(content: &str) -> Result<Vec<u8>, String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(401, "unauthorized")]
    #[case(403, "unauthorized")]
    #[case(404, "not_found")]
    #[case(400, "rejected")]
    #[case(409, "rejected")]
    #[case(422, "rejected")]
    #[case(408, "status")]
    #[case(429, "status")]
    #[case(500, "status")]
    #[case(503, "status")]
    fn status_codes_map_to_error_classes(#[case] status: u16, #[case] class: &str) {
        let err = map_status(Operation::CreateTree, status, r#"{"message":"nope"}"#);
        let actual = match err {
            ApiError::Unauthorized { .. } => "unauthorized",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Rejected { .. } => "rejected",
            ApiError::Status { .. } => "status",
            _ => "other",
        };
        assert_eq!(actual, class);
    }

    #[test]
    fn message_is_taken_from_json_body() {
        let err = map_status(Operation::CreateRef, 422, r#"{"message":"Reference already exists"}"#);
        assert!(err.to_string().contains("Reference already exists"));
    }

    #[test]
    fn only_a_taken_name_counts_as_existing_ref() {
        let taken = map_status(Operation::CreateRef, 422, r#"{"message":"Reference already exists"}"#);
        assert!(matches!(
            classify_create_ref("Conflict_1", taken),
            ApiError::AlreadyExists { .. }
        ));

        let invalid = map_status(
            Operation::CreateRef,
            422,
            r#"{"message":"refs/heads/Conflict 1 is not a valid ref name."}"#,
        );
        assert!(matches!(
            classify_create_ref("Conflict 1", invalid),
            ApiError::Rejected { status: 422, .. }
        ));

        let missing = map_status(Operation::CreateRef, 422, r#"{"message":"Object does not exist"}"#);
        assert!(matches!(
            classify_create_ref("Conflict_1", missing),
            ApiError::Rejected { .. }
        ));
    }

    #[test]
    fn non_json_body_is_used_verbatim() {
        let err = map_status(Operation::CreateBlob, 502, "Bad Gateway");
        assert!(err.to_string().contains("Bad Gateway"));
        assert!(err.is_transient());
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(encode_path("notes/my file.md"), "notes/my%20file.md");
        assert_eq!(encode_path("a#b?.md"), "a%23b%3F.md");
        assert_eq!(encode_path("caf\u{e9}.md"), "caf%C3%A9.md");
    }

    #[test]
    fn wrapped_base64_is_decoded() {
        let wrapped = "aGVsbG8g\nd29ybGQK\n";
        assert_eq!(decode_base64(wrapped).unwrap(), b"hello world\n");
    }

    #[test]
    fn debug_does_not_print_token() {
        let remote = HttpRemote::new(
            "https://api.example.com/",
            "octo",
            "notes",
            "ghp_secret",
            Duration::from_secs(5),
        );
        let rendered = format!("{remote:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(remote.url("git/blobs").starts_with("https://api.example.com/repos/octo/notes/"));
    }
}
