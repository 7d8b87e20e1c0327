//! Configuration snapshot.
//!
//! # Storage layout
//!
//! ```text
//! ~/.autosync/
//!   config.yaml   (mode 0600: holds the API token)
//! ```
//!
//! # API pattern
//!
//! Every function that touches disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Environment variables override file values at load time:
//! `GITHUB_USERNAME`, `GITHUB_REPO`, `GITHUB_TOKEN`, `WATCHED_FOLDER`,
//! `DEBOUNCE_SECONDS`, `DEBOUNCE_MINUTES` (minutes win when both are set).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::paths::{autosync_root, config_path};

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Pipeline-level recovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "default_recovery_delay")]
    pub delay_seconds: u64,
    #[serde(default = "default_recovery_retries")]
    pub max_retries: u32,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            delay_seconds: default_recovery_delay(),
            max_retries: default_recovery_retries(),
        }
    }
}

/// Per-request retry settings for every network step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRetrySettings {
    #[serde(default = "default_push_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_step")]
    pub backoff_step_seconds: u64,
}

impl Default for PushRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_push_attempts(),
            backoff_step_seconds: default_backoff_step(),
        }
    }
}

/// Immutable configuration snapshot taken at pipeline start.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub username: String,
    pub repo: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub watched_root: PathBuf,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: u64,
    #[serde(default = "default_extension_allowlist")]
    pub extension_allowlist: Vec<String>,
    #[serde(default = "default_ignored_dir_names")]
    pub ignored_dir_names: Vec<String>,
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub push_retry: PushRetrySettings,
    #[serde(default = "default_comment_delay")]
    pub comment_delay_seconds: u64,
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,
    #[serde(default = "default_backup_prefix")]
    pub backup_branch_prefix: String,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("username", &self.username)
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .field("branch", &self.branch)
            .field("api_base", &self.api_base)
            .field("watched_root", &self.watched_root)
            .field("debounce_seconds", &self.debounce_seconds)
            .field("extension_allowlist", &self.extension_allowlist)
            .field("ignored_dir_names", &self.ignored_dir_names)
            .field("quarantine_dir", &self.quarantine_dir)
            .field("recovery", &self.recovery)
            .field("push_retry", &self.push_retry)
            .finish_non_exhaustive()
    }
}

impl SyncConfig {
    /// A config with every optional field at its default.
    pub fn new(
        username: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
        watched_root: PathBuf,
    ) -> Self {
        Self {
            username: username.into(),
            repo: repo.into(),
            token: token.into(),
            branch: default_branch(),
            api_base: default_api_base(),
            watched_root,
            debounce_seconds: default_debounce_seconds(),
            extension_allowlist: default_extension_allowlist(),
            ignored_dir_names: default_ignored_dir_names(),
            quarantine_dir: default_quarantine_dir(),
            request_timeout_seconds: default_request_timeout(),
            recovery: RecoverySettings::default(),
            push_retry: PushRetrySettings::default(),
            comment_delay_seconds: default_comment_delay(),
            lock_ttl_seconds: default_lock_ttl(),
            backup_branch_prefix: default_backup_prefix(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn comment_delay(&self) -> Duration {
        Duration::from_secs(self.comment_delay_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    /// Absolute path of the local quarantine subtree.
    pub fn quarantine_root(&self) -> PathBuf {
        self.watched_root.join(&self.quarantine_dir)
    }

    /// `owner/repo` slug used in log lines and URLs.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.username, self.repo)
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().trim_matches('"').to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(username) = get("GITHUB_USERNAME") {
            self.username = username;
        }
        if let Some(repo) = get("GITHUB_REPO") {
            self.repo = repo;
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.token = token;
        }
        if let Some(root) = get("WATCHED_FOLDER") {
            self.watched_root = PathBuf::from(root);
        }
        if let Some(seconds) = get("DEBOUNCE_SECONDS") {
            self.debounce_seconds = seconds.parse().map_err(|_| ConfigError::Invalid {
                field: "DEBOUNCE_SECONDS",
                reason: format!("'{seconds}' is not a whole number of seconds"),
            })?;
        }
        if let Some(minutes) = get("DEBOUNCE_MINUTES") {
            let parsed: f64 = minutes.parse().map_err(|_| ConfigError::Invalid {
                field: "DEBOUNCE_MINUTES",
                reason: format!("'{minutes}' is not a number"),
            })?;
            if parsed > 0.0 {
                self.debounce_seconds = (parsed * 60.0).round() as u64;
            }
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("username", &self.username),
            ("repo", &self.repo),
            ("token", &self.token),
            ("branch", &self.branch),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.debounce_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "debounce_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.watched_root.is_dir() {
            return Err(ConfigError::Invalid {
                field: "watched_root",
                reason: format!("{} is not a directory", self.watched_root.display()),
            });
        }
        if let Some(bad) = self
            .extension_allowlist
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            return Err(ConfigError::Invalid {
                field: "extension_allowlist",
                reason: format!("'{bad}' must look like '.md'"),
            });
        }
        for (field, name) in [
            ("branch", self.branch.as_str()),
            ("backup_branch_prefix", self.backup_branch_prefix.as_str()),
        ] {
            if let Err(reason) = check_ref_name(name) {
                return Err(ConfigError::Invalid { field, reason });
            }
        }
        if self.quarantine_dir.is_empty() || self.quarantine_dir.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "quarantine_dir",
                reason: "must be a single directory name".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.autosync/config.yaml`, apply process environment overrides,
/// and validate.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    load_with_env_at(home, |key| std::env::var(key).ok())
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Load with an explicit environment lookup (tests pass a closure over a map).
pub fn load_with_env_at<F>(home: &Path, lookup: F) -> Result<SyncConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = read_at(home)?;
    config.apply_env_overrides(lookup)?;
    config.validate()?;
    Ok(config)
}

/// Parse the config file without overrides or validation.
///
/// Returns `ConfigError::NotInitialized` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn read_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path(home);
    if !path.exists() {
        return Err(ConfigError::NotInitialized { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.autosync/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    let dir = autosync_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path(home);
    let tmp_path = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_debounce_seconds() -> u64 {
    10
}

fn default_extension_allowlist() -> Vec<String> {
    vec![".md".to_string(), ".json".to_string()]
}

fn default_ignored_dir_names() -> Vec<String> {
    [
        ".obsidian",
        ".vscode",
        "__pycache__",
        ".git",
        "deleted",
        "deleted_temp",
        "push_comments",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_quarantine_dir() -> String {
    "deleted_files".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_recovery_delay() -> u64 {
    25
}

fn default_recovery_retries() -> u32 {
    3
}

fn default_push_attempts() -> u32 {
    3
}

fn default_backoff_step() -> u64 {
    5
}

fn default_comment_delay() -> u64 {
    10
}

fn default_lock_ttl() -> u64 {
    3600
}

fn default_backup_prefix() -> String {
    "Conflict_".to_string()
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Branch names (and the backup prefix, which gets a timestamp appended)
/// must survive `refs/heads/<name>` on the remote.
fn check_ref_name(name: &str) -> Result<(), String> {
    let bad_char = name
        .chars()
        .find(|c| c.is_control() || c.is_whitespace() || "~^:?*[\\".contains(*c));
    if let Some(c) = bad_char {
        return Err(format!("'{name}' contains {c:?}, which is not allowed in a ref name"));
    }
    if name.is_empty()
        || name.starts_with(['/', '.', '-'])
        || name.contains("..")
        || name.contains("//")
        || name.contains("@{")
        || name.contains("/.")
    {
        return Err(format!("'{name}' is not a valid ref name"));
    }
    Ok(())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
