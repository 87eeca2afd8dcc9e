//! Fixed-period background ticks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

/// Handle to a task started with [`spawn_periodic`].
///
/// Dropping the handle cancels the task after any tick in progress.
#[derive(Debug)]
pub struct PeriodicHandle {
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicHandle {
    /// Stop scheduling ticks. A tick already running is allowed to finish.
    pub fn cancel(&self) {
        // notify_one keeps a permit, so a cancel issued mid-tick is seen on the next loop.
        self.shutdown.notify_one();
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(&self) {
        self.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            match task.await {
                Err(e) if e.is_panic() => warn!(error = %e, "Periodic task panicked"),
                _ => {}
            }
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(true, |task| task.is_finished())
    }
}

impl Drop for PeriodicHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

/// Run `tick` every `period` on the tokio runtime, first after one period.
///
/// Ticks run one at a time on a single task: a tick that overruns the period
/// delays the next one and missed ticks are skipped, never run concurrently.
///
/// Must be called from within a tokio runtime.
pub fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> PeriodicHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shutdown = Arc::new(Notify::new());
    let notified = shutdown.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = notified.notified() => break,
                _ = ticker.tick() => tick().await,
            }
        }
    });

    PeriodicHandle {
        shutdown,
        task: Mutex::new(Some(task)),
    }
}
