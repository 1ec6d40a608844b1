//! Periodic background tasks with an explicit lifecycle
//!
//! Each component owns its timers and starts/stops them from its own
//! `start`/`stop`, so nothing ticks as a side effect of construction.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// A named task that runs a closure on a fixed period until stopped
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the ticking task. A running task is left untouched.
    ///
    /// The first tick fires one full period after start.
    pub fn start<F, Fut>(&self, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let period = self.period;
        let name = self.name;
        *handle = Some(tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick
            timer.tick().await;
            loop {
                timer.tick().await;
                tracing::trace!(task = name, "periodic tick");
                tick().await;
            }
        }));
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
    }

    /// Abort the task if it is running
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            tracing::debug!(task = self.name, "periodic task stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
