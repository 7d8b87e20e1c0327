//! State-directory layout.
//!
//! ```text
//! ~/.autosync/
//!   config.yaml     (mode 0600)
//!   daemon.sock
//!   run/push.lock   (cross-process push marker)
//!   conflicts/      (records of backup branches that could not be created)
//!   versions/       (default target of `autosync restore`)
//! ```

use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const PUSH_MARKER: &str = "push.lock";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn autosync_root(home: &Path) -> PathBuf {
    home.join(".autosync")
}

pub fn config_path(home: &Path) -> PathBuf {
    autosync_root(home).join(CONFIG_FILE)
}

pub fn run_dir(home: &Path) -> PathBuf {
    autosync_root(home).join("run")
}

pub fn push_marker_path(home: &Path) -> PathBuf {
    run_dir(home).join(PUSH_MARKER)
}

pub fn socket_path(home: &Path) -> PathBuf {
    autosync_root(home).join(DAEMON_SOCKET)
}

pub fn conflicts_dir(home: &Path) -> PathBuf {
    autosync_root(home).join("conflicts")
}

pub fn versions_dir(home: &Path) -> PathBuf {
    autosync_root(home).join("versions")
}
