//! Single-slot delayed task.
//!
//! Submitting a task cancels whatever is still pending and arms a fresh
//! delay, so a burst of submissions runs the last task once, `delay` after
//! the burst ends.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct DebounceScheduler {
    delay: Duration,
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending task with `task`, due `delay` from now.
    ///
    /// Must be called inside a tokio runtime.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + self.delay;
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            task.await;
        }));
    }

    /// Drop the pending task; `true` if one was still waiting.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        match slot.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time::{advance, sleep};

    use super::*;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_collapses_into_one_run() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DebounceScheduler::new(Duration::from_secs(10));

        for _ in 0..5 {
            scheduler.submit(counter_task(&fired));
            advance(Duration::from_secs(2)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0, "quiet period restarts on every event");
        assert!(scheduler.is_pending());

        sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn runs_only_after_the_full_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DebounceScheduler::new(Duration::from_secs(10));
        scheduler.submit(counter_task(&fired));

        sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancel_prevents_the_run() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DebounceScheduler::new(Duration::from_secs(10));
        scheduler.submit(counter_task(&fired));

        assert!(scheduler.cancel());
        assert!(!scheduler.cancel(), "nothing left to cancel");
        sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn separate_bursts_each_run_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = DebounceScheduler::new(Duration::from_secs(1));

        scheduler.submit(counter_task(&fired));
        sleep(Duration::from_secs(2)).await;
        scheduler.submit(counter_task(&fired));
        scheduler.submit(counter_task(&fired));
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
