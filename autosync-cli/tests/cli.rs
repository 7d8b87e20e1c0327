use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use autosync_core::config;

fn autosync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("autosync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("GITHUB_TOKEN")
        .env_remove("GITHUB_USERNAME")
        .env_remove("GITHUB_REPO")
        .env_remove("WATCHED_FOLDER")
        .env_remove("DEBOUNCE_SECONDS")
        .env_remove("DEBOUNCE_MINUTES");
    cmd
}

fn init(home: &TempDir, root: &TempDir) {
    autosync_cmd(home.path())
        .args(["init", "--user", "octo", "--repo", "notes", "--debounce", "30", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(contains("octo/notes"))
        .stdout(contains("export GITHUB_TOKEN"));
}

#[test]
fn init_writes_config() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("root");
    init(&home, &root);

    let saved = config::read_at(home.path()).expect("config written");
    assert_eq!(saved.username, "octo");
    assert_eq!(saved.repo, "notes");
    assert_eq!(saved.debounce_seconds, 30);
    assert_eq!(saved.token, "");
    assert_eq!(saved.watched_root, root.path().canonicalize().unwrap());
}

#[test]
fn init_rejects_missing_folder() {
    let home = TempDir::new().expect("home");
    autosync_cmd(home.path())
        .args(["init", "--user", "octo", "--repo", "notes", "--root"])
        .arg(home.path().join("does-not-exist"))
        .assert()
        .failure()
        .stderr(contains("cannot resolve folder"));
}

#[test]
fn init_rejects_zero_debounce() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("root");
    autosync_cmd(home.path())
        .args(["init", "--user", "octo", "--repo", "notes", "--debounce", "0", "--root"])
        .arg(root.path())
        .assert()
        .failure()
        .stderr(contains("debounce_seconds"));
}

#[test]
fn push_without_config_points_at_init() {
    let home = TempDir::new().expect("home");
    autosync_cmd(home.path())
        .arg("push")
        .assert()
        .failure()
        .stderr(contains("autosync init"));
}

#[test]
fn push_without_token_fails_validation() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("root");
    init(&home, &root);
    autosync_cmd(home.path())
        .args(["push", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("token"));
}

#[test]
fn local_status_counts_tracked_files() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("root");
    fs::write(root.path().join("a.md"), "a").unwrap();
    fs::write(root.path().join("b.json"), "{}").unwrap();
    fs::write(root.path().join("c.png"), "png").unwrap();
    fs::create_dir_all(root.path().join(".obsidian")).unwrap();
    fs::write(root.path().join(".obsidian/workspace.json"), "{}").unwrap();
    init(&home, &root);

    let output = autosync_cmd(home.path())
        .args(["status", "--local", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status JSON");
    assert_eq!(status["repo"], "octo/notes");
    assert_eq!(status["tracked_files"], 2);
    assert_eq!(status["token_set"], false);
    assert_eq!(status["daemon"]["running"], false);
    assert!(status["push_marker"].is_null());
    assert!(status.get("pending").is_none());
}

#[test]
fn status_picks_up_token_from_environment() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("root");
    init(&home, &root);

    autosync_cmd(home.path())
        .env("GITHUB_TOKEN", "from-env")
        .args(["status", "--local", "--json"])
        .assert()
        .success()
        .stdout(contains(r#""token_set": true"#));
}

#[test]
fn daemon_commands_without_daemon() {
    let home = TempDir::new().expect("home");

    autosync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));

    autosync_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains(r#""running": false"#));

    autosync_cmd(home.path())
        .args(["daemon", "sync"])
        .assert()
        .failure()
        .stderr(contains("not running"));
}

#[test]
fn history_without_config_points_at_init() {
    let home = TempDir::new().expect("home");
    autosync_cmd(home.path())
        .arg("history")
        .assert()
        .failure()
        .stderr(contains("autosync init"));
}

#[test]
fn history_limit_is_bounded() {
    let home = TempDir::new().expect("home");
    autosync_cmd(home.path())
        .args(["history", "--limit", "0"])
        .assert()
        .failure()
        .stderr(contains("--limit"));
}

#[test]
fn restore_needs_a_commit() {
    let home = TempDir::new().expect("home");
    autosync_cmd(home.path())
        .arg("restore")
        .assert()
        .failure()
        .stderr(contains("<COMMIT>"));
}
