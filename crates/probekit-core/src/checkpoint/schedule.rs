//! Cancellable periodic task.
//!
//! Each `ScheduledTask` owns one spawned tokio task that calls a tick closure
//! on a fixed period until cancelled. Dropping the handle cancels the task.
//! Cancellation is observed between ticks only: a tick that has started
//! always runs to completion. A panicking tick is logged and the schedule
//! keeps running.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

pub struct ScheduledTask {
    token: CancellationToken,
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn a task calling `tick` every `period`, first after one period.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F, Fut>(name: &str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if AssertUnwindSafe(tick()).catch_unwind().await.is_err() {
                    tracing::error!(task = name.as_str(), "scheduled tick panicked");
                }
            }
            tracing::debug!(task = name.as_str(), "scheduled task stopped");
        });

        Self {
            guard: token.clone().drop_guard(),
            token,
            handle,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Cancel and wait for the task to exit, including any tick in progress.
    pub async fn shutdown(self) {
        let ScheduledTask { guard, handle, .. } = self;
        drop(guard);
        let _ = handle.await;
    }
}
