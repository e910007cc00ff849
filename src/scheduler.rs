//! A minimal delayed-task scheduler, used only to drive the delayed
//! double-delete on invalidation (§4.5 / §9).
//!
//! The full job scheduler in `scheduling::scheduler` (cron expressions,
//! priorities, persistence) is far more machinery than one-shot,
//! millisecond-scale delays need; this module keeps its naming and
//! cancel-by-handle shape but drops the cron/queue/priority surface.

use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// A handle to a scheduled one-shot task. Dropping it does not cancel the
/// task — call `cancel()` explicitly, mirroring `Job`'s explicit
/// cancellation in the teacher's scheduler.
pub struct ScheduledTask {
    cancel_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ScheduledTask {
    /// Cancel the task if it has not yet fired.
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the task to complete (fired or cancelled).
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Schedules delayed one-shot closures on the ambient Tokio runtime.
///
/// Named `DelayScheduler` rather than `JobScheduler` because it schedules
/// bare delayed actions, not `Job` records with priority/retry/persistence
/// semantics — those belong to the heavier scheduler this module is
/// deliberately not reproducing. Outstanding tasks are tracked so `shutdown`
/// can wait out the delayed double-deletes still in flight, per §5's "two
/// worker threads, shutdown on close with a 5 s grace" (the worker-thread
/// count is the ambient Tokio runtime's; this module owns only the grace
/// period and cancellation, not the thread pool itself). Tracking keeps only
/// `AbortHandle`s — cheap, `Clone`, and queryable via `is_finished()` —
/// rather than the `JoinHandle`s themselves, so a caller's own
/// `ScheduledTask` keeps full ownership of its handle.
#[derive(Clone, Default)]
pub struct DelayScheduler {
    outstanding: Arc<Mutex<Vec<AbortHandle>>>,
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once, after `delay`, unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_async(delay, move || async move { action() })
    }

    /// Run an async `action` once, after `delay`, unless cancelled first.
    pub fn schedule_async<F, Fut>(&self, delay: Duration, action: F) -> ScheduledTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let join = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    action().await;
                }
                _ = &mut cancel_rx => {
                    debug!("scheduled delayed task cancelled before firing");
                }
            }
        });

        let mut outstanding = self.outstanding.lock();
        outstanding.retain(|h| !h.is_finished());
        outstanding.push(join.abort_handle());
        drop(outstanding);

        ScheduledTask {
            cancel_tx: Some(cancel_tx),
            join,
        }
    }

    /// Wait for every outstanding scheduled task to finish, up to `grace`;
    /// anything still running past the deadline is aborted. Used by the
    /// facade's `close()` to drain in-flight delayed double-deletes.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        const POLL_INTERVAL: Duration = Duration::from_millis(20);

        loop {
            let remaining_tasks = {
                let mut outstanding = self.outstanding.lock();
                outstanding.retain(|h| !h.is_finished());
                outstanding.len()
            };
            if remaining_tasks == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - tokio::time::Instant::now())).await;
        }

        let stragglers = std::mem::take(&mut *self.outstanding.lock());
        for handle in stragglers {
            if !handle.is_finished() {
                debug!("scheduled task exceeded shutdown grace period; aborting");
                handle.abort();
            }
        }
    }
}

/// Convenience alias for the facade's shared scheduler handle.
pub type SharedScheduler = Arc<DelayScheduler>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn scheduled_action_fires_after_delay() {
        let scheduler = DelayScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let task = scheduler.schedule(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });
        task.join().await;

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelled_action_never_fires() {
        let scheduler = DelayScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let task = scheduler.schedule(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        task.cancel();

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
