//! Background maintenance tasks with a shared stop signal.
//!
//! The gateway runs two periodic sweeps (rate-limiter state eviction and
//! expired-session purge). Both are started through [`BackgroundTasks`] and
//! stopped together on shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Owner of the gateway's periodic tasks.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl BackgroundTasks {
    /// Create an empty task set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `period` until shutdown. The first run happens one
    /// period after spawning.
    ///
    /// A zero period, or one too long to schedule, is refused: nothing is
    /// spawned and `false` is returned.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(start) = Instant::now().checked_add(period).filter(|_| !period.is_zero()) else {
            tracing::error!(task = name, ?period, "Refusing to start periodic task");
            return false;
        };
        let token = self.cancel.child_token();

        self.tracker.spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(task = name, period_secs = period.as_secs(), "Periodic task started");

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }

            tracing::debug!(task = name, "Periodic task stopped");
        });
        true
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop all tasks and wait for them, up to `timeout`.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();

        tokio::select! {
            () = self.tracker.wait() => true,
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(remaining = self.tracker.len(), "Background tasks did not stop in time");
                false
            }
        }
    }
}
