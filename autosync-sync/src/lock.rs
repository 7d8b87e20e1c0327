//! PushLock: at most one pipeline run at a time.
//!
//! Two layers guard a run:
//! - [`SingleFlight`], an atomic flag shared by every pipeline in the process
//!   (injected as an `Arc`, never global);
//! - [`MarkerFile`], `<home>/.autosync/run/push.lock`, created exclusively so
//!   a second process sees the first one's run.
//!
//! Both are released by dropping the [`PushGuard`].

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// In-process flag
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the flag; `false` if a run is already in flight.
    pub fn try_begin(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Cross-process marker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerContents {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
    ttl: Duration,
}

impl MarkerFile {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker. `Ok(false)` when a live marker is in the way; a
    /// stale one is taken over and creation retried once.
    pub fn try_create(&self) -> Result<bool, SyncError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    let contents = MarkerContents {
                        pid: std::process::id(),
                        created_at: Utc::now(),
                    };
                    let body = serde_json::to_vec(&contents)?;
                    file.write_all(&body).map_err(|e| io_err(&self.path, e))?;
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let judged = match std::fs::read(&self.path) {
                        Ok(bytes) => bytes,
                        // Released between our create and read.
                        Err(err) if err.kind() == ErrorKind::NotFound => continue,
                        Err(err) => return Err(io_err(&self.path, err)),
                    };
                    if !self.judge(&judged) {
                        return Ok(false);
                    }
                    tracing::warn!("taking over stale push marker {}", self.path.display());
                    if !self.take_over(&judged)? {
                        return Ok(false);
                    }
                }
                Err(err) => return Err(io_err(&self.path, err)),
            }
        }
        Ok(false)
    }

    /// Move the marker aside and discard it if it is still the one judged
    /// stale. A marker recreated by another process in the meantime is put
    /// back and `Ok(false)` returned.
    fn take_over(&self, judged: &[u8]) -> Result<bool, SyncError> {
        let claimed = self
            .path
            .with_extension(format!("lock.stale.{}", std::process::id()));
        match std::fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(io_err(&self.path, err)),
        }
        let moved = std::fs::read(&claimed).map_err(|e| io_err(&claimed, e))?;
        if moved == judged {
            let _ = std::fs::remove_file(&claimed);
            return Ok(true);
        }
        // hard_link never replaces an existing file.
        if let Err(err) = std::fs::hard_link(&claimed, &self.path) {
            tracing::warn!("could not restore push marker {}: {err}", self.path.display());
        }
        let _ = std::fs::remove_file(&claimed);
        Ok(false)
    }

    pub fn read(&self) -> Option<MarkerContents> {
        let bytes = std::fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Older than the TTL, or left by a process that no longer exists.
    pub fn is_stale(&self) -> bool {
        std::fs::read(&self.path).is_ok_and(|bytes| self.judge(&bytes))
    }

    /// An unparsable marker (another process may be mid-write) is judged by
    /// its modification time alone.
    fn judge(&self, bytes: &[u8]) -> bool {
        match serde_json::from_slice::<MarkerContents>(bytes) {
            Ok(contents) => {
                let age = Utc::now().signed_duration_since(contents.created_at);
                let expired = age.to_std().map(|age| age > self.ttl).unwrap_or(false);
                expired || !process_alive(contents.pid)
            }
            Err(_) => std::fs::metadata(&self.path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age > self.ttl),
        }
    }

    /// Remove the marker; a missing file is fine.
    pub fn remove(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!("could not remove push marker {}: {err}", self.path.display());
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

// ---------------------------------------------------------------------------
// PushLock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PushLock {
    flight: Arc<SingleFlight>,
    marker: MarkerFile,
}

impl PushLock {
    pub fn new(flight: Arc<SingleFlight>, marker: MarkerFile) -> Self {
        Self { flight, marker }
    }

    /// `Ok(None)` when another run holds either layer.
    pub fn acquire(&self) -> Result<Option<PushGuard<'_>>, SyncError> {
        if !self.flight.try_begin() {
            tracing::info!("push already in progress in this process; skipping");
            return Ok(None);
        }
        match self.marker.try_create() {
            Ok(true) => Ok(Some(PushGuard { lock: self })),
            Ok(false) => {
                self.flight.finish();
                tracing::info!(
                    "push marker {} held by another process; skipping",
                    self.marker.path().display()
                );
                Ok(None)
            }
            Err(err) => {
                self.flight.finish();
                Err(err)
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.flight.is_busy()
    }

    pub fn marker(&self) -> &MarkerFile {
        &self.marker
    }
}

/// Releases both layers on drop, whatever the outcome of the run.
#[derive(Debug)]
pub struct PushGuard<'a> {
    lock: &'a PushLock,
}

impl Drop for PushGuard<'_> {
    fn drop(&mut self) {
        self.lock.marker.remove();
        self.lock.flight.finish();
    }
}
