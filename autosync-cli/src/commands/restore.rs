//! `autosync restore <commit> [--into <dir>]`: write a pushed version out
//! next to the watched folder.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;

use autosync_core::paths;
use autosync_sync::restore::version_dir_name;

use super::push::open_pipeline;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Commit to restore, as shown by `autosync history`.
    pub commit: String,

    /// Empty or missing directory to write into
    /// (default: ~/.autosync/versions/<commit>_<timestamp>).
    #[arg(long)]
    pub into: Option<PathBuf>,
}

impl RestoreArgs {
    pub fn run(self) -> Result<()> {
        let commit = self.commit.trim();
        if commit.is_empty() {
            bail!("commit must not be empty");
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        let pipeline = open_pipeline(&home)?;
        let into = self.into.unwrap_or_else(|| {
            paths::versions_dir(&home).join(version_dir_name(commit, &Local::now()))
        });

        let report = pipeline
            .restore(commit, &into)
            .with_context(|| format!("could not restore {commit}"))?;
        println!(
            "✓ restored {} files from {} into {}",
            report.written.len(),
            commit,
            report.dir.display()
        );
        for rel in &report.skipped {
            println!("  {} skipped unsafe path {rel}", "!".yellow().bold());
        }
        Ok(())
    }
}
