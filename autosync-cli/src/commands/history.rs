//! `autosync history [--limit N] [--json]`: recent pushes and backup branches.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use autosync_sync::History;

use super::push::open_pipeline;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// How many commits to show (at most 100).
    #[arg(long, short = 'n', default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub limit: u16,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "pushed")]
    pushed: String,
    #[tabled(rename = "message")]
    message: String,
    #[tabled(rename = "description")]
    description: String,
}

impl HistoryArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let pipeline = open_pipeline(&home)?;
        let history = pipeline
            .history(usize::from(self.limit))
            .context("could not read push history")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&history).context("failed to serialize history JSON")?
            );
        } else {
            print_history(&history);
        }
        Ok(())
    }
}

fn print_history(history: &History) {
    if history.entries.is_empty() {
        println!("no pushes on '{}' yet", history.branch);
    } else {
        let rows: Vec<HistoryRow> = history
            .entries
            .iter()
            .map(|entry| HistoryRow {
                commit: entry.commit.sha.chars().take(7).collect(),
                pushed: entry
                    .commit
                    .committed_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                message: first_line(&entry.commit.message),
                description: entry
                    .comments
                    .last()
                    .map(|body| first_line(body))
                    .unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if !history.backups.is_empty() {
        println!("{} backup branches:", "■".yellow().bold());
        for backup in &history.backups {
            println!(
                "  {} @ {}",
                backup.name,
                backup.commit_sha.chars().take(7).collect::<String>()
            );
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}
