//! Repeating timers built on top of the executor queue

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::executor::Inner;
use crate::task::Due;

/// Cancellation token of a periodic task
///
/// Cloning yields another handle to the same timer. Dropping every handle
/// does not cancel the timer; only [`PeriodicHandle::cancel`] or stopping
/// the executor ends the chain.
#[derive(Debug, Clone, Default)]
pub struct PeriodicHandle {
    cancelled: Arc<AtomicBool>,
}

impl PeriodicHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stop future runs. A run already in progress completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Re-arming timer state, owned by the queue entry of its next run
pub(crate) struct PeriodicTask {
    body: Box<dyn Fn() + Send + Sync>,
    interval: Duration,
    handle: PeriodicHandle,
    executor: Weak<Inner>,
}

impl PeriodicTask {
    pub(crate) fn new(
        body: Box<dyn Fn() + Send + Sync>,
        interval: Duration,
        handle: PeriodicHandle,
        executor: Weak<Inner>,
    ) -> Self {
        Self {
            body,
            interval,
            handle,
            executor,
        }
    }

    /// Arm the first run, one interval from now
    pub(crate) fn schedule(self: &Arc<Self>) -> bool {
        self.schedule_at(Instant::now() + self.interval)
    }

    fn schedule_at(self: &Arc<Self>, at: Instant) -> bool {
        let Some(inner) = self.executor.upgrade() else {
            return false;
        };
        if !inner.is_enabled() {
            return false;
        }
        let next = Arc::clone(self);
        inner.push(Due::At(at), Box::new(move || next.fire()))
    }

    fn fire(self: Arc<Self>) {
        if self.handle.is_cancelled() {
            debug!("Periodic task cancelled");
            return;
        }

        let started = Instant::now();
        if !self.schedule_at(started + self.interval) {
            debug!("Periodic task not re-armed: executor stopped");
        }
        (self.body)();
    }
}
