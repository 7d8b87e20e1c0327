//! `autosync status`: configuration, push lock, daemon and pending changes.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use autosync_core::{config, paths, ChangeSet, SyncConfig};
use autosync_daemon::{send_request, DaemonRequest};
use autosync_remote::HttpRemote;
use autosync_sync::lock::MarkerContents;
use autosync_sync::{snapshot, MarkerFile, PathRules, Pipeline};

use super::push::print_changes;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Skip the comparison with the remote branch.
    #[arg(long)]
    pub local: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let report = build_report(&home, self.local)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
        } else {
            print_report(&report);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    repo: String,
    branch: String,
    watched_root: String,
    debounce_seconds: u64,
    token_set: bool,
    tracked_files: usize,
    push_marker: Option<MarkerStatus>,
    daemon: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending: Option<ChangeSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_error: Option<String>,
    #[serde(skip)]
    quarantine_dir: String,
}

#[derive(Debug, Serialize)]
struct MarkerStatus {
    #[serde(flatten)]
    contents: Option<MarkerContents>,
    stale: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

fn build_report(home: &Path, local_only: bool) -> Result<StatusReport> {
    // Status must work before a token is available, so skip validation.
    let mut cfg = config::read_at(home).context("failed to load config (run `autosync init` first)")?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())
        .context("invalid environment override")?;

    let rules = PathRules::from_config(&cfg);
    let tracked_files = snapshot::build_filtered(
        &cfg.watched_root,
        rules.ignored_dir_names(),
        |rel| rules.is_tracked(rel),
    )
    .with_context(|| format!("cannot scan {}", cfg.watched_root.display()))?
    .len();

    let marker = MarkerFile::new(paths::push_marker_path(home), cfg.lock_ttl());
    let push_marker = marker.path().exists().then(|| MarkerStatus {
        contents: marker.read(),
        stale: marker.is_stale(),
    });

    let (pending, remote_error) = if local_only {
        (None, None)
    } else {
        match pending_changes(home, &cfg) {
            Ok(changes) => (Some(changes), None),
            Err(err) => (None, Some(format!("{err:#}"))),
        }
    };

    Ok(StatusReport {
        repo: cfg.slug(),
        branch: cfg.branch.clone(),
        watched_root: cfg.watched_root.display().to_string(),
        debounce_seconds: cfg.debounce_seconds,
        token_set: !cfg.token.trim().is_empty(),
        tracked_files,
        push_marker,
        daemon: daemon_status(home)?,
        pending,
        remote_error,
        quarantine_dir: cfg.quarantine_dir.clone(),
    })
}

fn pending_changes(home: &Path, cfg: &SyncConfig) -> Result<ChangeSet> {
    cfg.validate().context("configuration incomplete")?;
    let remote = Arc::new(HttpRemote::from_config(cfg));
    let plan = Pipeline::new(cfg.clone(), remote, home)
        .plan()
        .context("could not read the remote branch")?;
    Ok(plan.changes)
}

fn daemon_status(home: &Path) -> Result<Value> {
    match send_request(home, &DaemonRequest::new("status")) {
        Ok(response) if response.ok => Ok(response.data.unwrap_or(Value::Null)),
        Ok(response) => Ok(serde_json::json!({
            "running": true,
            "error": response.error,
        })),
        Err(err) if err.is_not_running() => Ok(serde_json::json!({ "running": false })),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn print_report(report: &StatusReport) {
    println!(
        "autosync v{} | {} → {}",
        env!("CARGO_PKG_VERSION"),
        report.watched_root,
        report.repo,
    );

    let rows = vec![
        StatusRow {
            field: "branch",
            value: report.branch.clone(),
        },
        StatusRow {
            field: "debounce",
            value: format!("{}s", report.debounce_seconds),
        },
        StatusRow {
            field: "token",
            value: if report.token_set { "set" } else { "missing" }.to_string(),
        },
        StatusRow {
            field: "tracked files",
            value: report.tracked_files.to_string(),
        },
        StatusRow {
            field: "push lock",
            value: marker_label(report.push_marker.as_ref()),
        },
        StatusRow {
            field: "daemon",
            value: daemon_label(&report.daemon),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if let Some(err) = &report.remote_error {
        println!("{} remote: {err}", "!".yellow().bold());
    }
    match &report.pending {
        Some(changes) if changes.is_empty() => println!("{} in sync with remote", "■".green().bold()),
        Some(changes) => {
            println!("{} pending: {changes}", "■".yellow().bold());
            print_changes(changes, &report.quarantine_dir);
        }
        None => {}
    }
}

fn marker_label(marker: Option<&MarkerStatus>) -> String {
    match marker {
        None => "free".to_string(),
        Some(MarkerStatus { stale: true, .. }) => "stale marker (removed on next run)".to_string(),
        Some(MarkerStatus {
            contents: Some(contents),
            ..
        }) => format!(
            "held by pid {}, created {}",
            contents.pid,
            format_age(contents.created_at)
        ),
        Some(_) => "held".to_string(),
    }
}

fn daemon_label(daemon: &Value) -> String {
    if daemon["running"] != Value::Bool(true) {
        return "not running".to_string();
    }
    let pid = daemon["pid"].as_u64().map(|pid| format!(" (pid {pid})")).unwrap_or_default();
    let last = daemon["last_run"]["outcome"]
        .as_str()
        .map(|outcome| format!("; last run: {outcome}"))
        .unwrap_or_default();
    let pending = if daemon["pending"] == Value::Bool(true) {
        "; run scheduled"
    } else {
        ""
    };
    format!("running{pid}{pending}{last}")
}

fn format_age(at: DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}
