//! `autosync push [--dry-run]`: one pipeline run from the foreground.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use autosync_core::{config, ChangeSet};
use autosync_remote::HttpRemote;
use autosync_sync::{paths::flatten, ConflictOutcome, Pipeline, PipelineOutcome};

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Show what would be pushed without changing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let pipeline = open_pipeline(&home)?;
        let quarantine = pipeline.config().quarantine_dir.clone();

        if self.dry_run {
            let plan = pipeline.plan().context("could not compare with the remote")?;
            if plan.changes.is_empty() {
                println!("[dry-run] ✓ nothing to push");
            } else {
                println!("[dry-run] would push {}", plan.changes);
                print_changes(&plan.changes, &quarantine);
            }
            return Ok(());
        }

        let outcome = pipeline.run_with_recovery().context("push failed")?;
        let line = outcome.describe();
        let PipelineOutcome::Pushed(mut summary) = outcome else {
            println!("✓ {line}");
            return Ok(());
        };

        println!("✓ {line}");
        print_changes(&summary.changes, &quarantine);
        println!(
            "  {} blobs uploaded, {} reused",
            summary.uploaded, summary.reused
        );
        for rel in &summary.archive.failed {
            println!("  {} could not archive {rel}", "!".yellow().bold());
        }
        if let ConflictOutcome::Diverged { backup_branch, .. } = &summary.conflict {
            println!(
                "  {} remote had diverged; previous head kept on '{backup_branch}'",
                "!".yellow().bold()
            );
        }

        if let Some(handle) = summary.comment.take() {
            println!(
                "  posting push description in {}s…",
                pipeline.config().comment_delay_seconds
            );
            match handle.join() {
                Ok(true) => println!("  ✓ description posted"),
                Ok(false) => println!("  description not posted (rerun with -v for details)"),
                Err(_) => println!("  description thread panicked"),
            }
        }
        Ok(())
    }
}

/// Load the config and wire a pipeline against the HTTP remote.
pub(crate) fn open_pipeline(home: &Path) -> Result<Pipeline> {
    let cfg = config::load_at(home).context("failed to load config (run `autosync init` first)")?;
    let remote = Arc::new(HttpRemote::from_config(&cfg));
    Ok(Pipeline::new(cfg, remote, home))
}

pub(crate) fn print_changes(changes: &ChangeSet, quarantine_dir: &str) {
    for path in &changes.added {
        println!("  {} {path}", "+".green().bold());
    }
    for path in &changes.modified {
        println!("  {} {path}", "~".yellow().bold());
    }
    for path in &changes.deleted {
        println!(
            "  {} {path} → {quarantine_dir}/{}",
            "-".red().bold(),
            flatten(path)
        );
    }
}
