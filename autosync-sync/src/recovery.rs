//! Recovery handler: re-run the whole pipeline after recoverable failures.
//!
//! Every run starts from scratch (fresh snapshot, fresh diff), which is safe
//! because each stage is idempotent or purely additive on the remote.

use std::time::Duration;

use autosync_core::{RecoverySettings, RecoveryState};

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct RecoveryHandler {
    state: RecoveryState,
}

impl RecoveryHandler {
    pub fn new(max_retries: u32, backoff_seconds: u64) -> Self {
        Self {
            state: RecoveryState::new(max_retries, backoff_seconds),
        }
    }

    pub fn from_settings(settings: &RecoverySettings) -> Self {
        Self::new(settings.max_retries, settings.delay_seconds)
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Invoke `pipeline` until it succeeds, fails fatally, or the failure
    /// count exceeds `max_retries`.
    ///
    /// The counter resets on success and after a failure is surfaced, so the
    /// next trigger starts with a full budget.
    pub fn run<T, F>(&mut self, mut pipeline: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Result<T, SyncError>,
    {
        loop {
            match pipeline() {
                Ok(value) => {
                    if self.state.retry_count > 0 {
                        tracing::info!("pipeline recovered after {} retries", self.state.retry_count);
                    }
                    self.state.reset();
                    return Ok(value);
                }
                Err(err) if !err.is_recoverable() => {
                    tracing::error!("pipeline failed with a fatal error: {err}");
                    self.state.reset();
                    return Err(err);
                }
                Err(err) => {
                    if !self.state.record_failure() {
                        tracing::error!(
                            "pipeline failed {} times; giving up: {err}",
                            self.state.retry_count
                        );
                        self.state.reset();
                        return Err(err);
                    }
                    let delay = Duration::from_secs(self.state.backoff_seconds);
                    tracing::warn!(
                        "recoverable pipeline error ({err}); retry {}/{} in {delay:?}",
                        self.state.retry_count,
                        self.state.max_retries
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }
}
