//! `autosync init --user <name> --repo <repo> --root <dir>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use autosync_core::{config, SyncConfig};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Account that owns the repository.
    #[arg(long, short = 'u')]
    pub user: String,

    /// Repository name.
    #[arg(long, short = 'r')]
    pub repo: String,

    /// Folder to mirror.
    #[arg(long)]
    pub root: PathBuf,

    /// API token. Leave unset to supply GITHUB_TOKEN at run time.
    #[arg(long)]
    pub token: Option<String>,

    /// Quiet period before a watcher-triggered push, in seconds.
    #[arg(long, value_name = "SECS")]
    pub debounce: Option<u64>,

    /// Branch to push to.
    #[arg(long, default_value = "main")]
    pub branch: String,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot resolve folder '{}'", self.root.display()))?;

        let token_supplied = self.token.is_some();
        let mut cfg = SyncConfig::new(self.user, self.repo, self.token.unwrap_or_default(), root);
        cfg.branch = self.branch;
        if let Some(debounce) = self.debounce {
            cfg.debounce_seconds = debounce;
        }

        // The token may legitimately arrive later through the environment.
        let mut check = cfg.clone();
        if !token_supplied {
            check.token = "pending".to_string();
        }
        check.validate().context("invalid configuration")?;

        let path = config::save_at(&home, &cfg).context("failed to write config")?;
        println!("✓ Mirroring {} to {}", cfg.watched_root.display(), cfg.slug());
        println!("  Saved to: {}", path.display());
        if !token_supplied {
            println!("  No token stored; export GITHUB_TOKEN before pushing.");
        }
        Ok(())
    }
}
