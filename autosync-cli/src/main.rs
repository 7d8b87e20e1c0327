//! autosync: mirror a local folder to a remote repository branch.
//!
//! # Usage
//!
//! ```text
//! autosync init --user <name> --repo <repo> --root <dir> [--token <t>] [--debounce <secs>]
//! autosync push [--dry-run]
//! autosync status [--local] [--json]
//! autosync history [--limit <n>] [--json]
//! autosync restore <commit> [--into <dir>]
//! autosync daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, history::HistoryArgs, init::InitArgs, push::PushArgs,
    restore::RestoreArgs, status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "autosync",
    version,
    about = "Mirror a local folder to a remote repository branch",
    long_about = None,
)]
struct Cli {
    /// Print pipeline logs (honours RUST_LOG).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.autosync/config.yaml for a folder and repository.
    Init(InitArgs),

    /// Push local changes now.
    Push(PushArgs),

    /// Show configuration, lock and pending changes.
    Status(StatusArgs),

    /// List recent pushes with their descriptions and backup branches.
    History(HistoryArgs),

    /// Write a pushed version into a separate folder.
    Restore(RestoreArgs),

    /// Run or control the background watcher.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        autosync_daemon::init_tracing();
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Push(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::History(args) => args.run(),
        Commands::Restore(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
