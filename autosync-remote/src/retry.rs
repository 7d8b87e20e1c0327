//! One retry policy shared by every network step.

use std::time::Duration;

use autosync_core::PushRetrySettings;

use crate::error::ApiError;

/// Delay between attempts, given the 1-based number of the attempt that
/// just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `step × attempt`.
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(attempt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; treated as at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

impl RetryPolicy {
    /// Three attempts, 5 s × attempt between them.
    pub fn network() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear(Duration::from_secs(5)),
        }
    }

    /// `attempts` tries with no sleep in between.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            backoff: Backoff::None,
        }
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn from_settings(settings: &PushRetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: Backoff::Linear(Duration::from_secs(settings.backoff_step_seconds)),
        }
    }

    /// Run `f`, retrying transient [`ApiError`]s.
    pub fn run<T, F>(&self, label: &str, f: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Result<T, ApiError>,
    {
        self.run_if(label, ApiError::is_transient, f)
    }

    /// Run `f`, retrying while `retryable` accepts the error and attempts
    /// remain. The last error is returned unchanged.
    pub fn run_if<T, E, F, P>(&self, label: &str, retryable: P, mut f: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{label}: succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts && retryable(&err) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        "{label}: attempt {attempt}/{max_attempts} failed ({err}); retrying in {delay:?}"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::api::Operation;

    fn transient() -> ApiError {
        ApiError::Status {
            op: Operation::CreateCommit,
            status: 502,
            message: "bad gateway".into(),
        }
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let backoff = Backoff::Linear(Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(10));
        assert_eq!(Backoff::None.delay(7), Duration::ZERO);
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).run("commit", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(transient())
            } else {
                Ok("sha")
            }
        });
        assert_eq!(result, Ok("sha"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn attempts_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3).run("commit", || {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert_eq!(result, Err(transient()));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn definitive_rejection_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3).run("commit", || {
            calls.set(calls.get() + 1);
            Err(ApiError::Unauthorized {
                op: Operation::CreateCommit,
                status: 401,
                message: "Bad credentials".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let calls = Cell::new(0);
        let _ = RetryPolicy::immediate(0).run("commit", || -> Result<(), ApiError> {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert_eq!(calls.get(), 1);
    }
}
