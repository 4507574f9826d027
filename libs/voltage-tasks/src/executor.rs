//! Single worker thread draining the time-ordered task queue

use std::any::Any;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TaskError};
use crate::periodic::{PeriodicHandle, PeriodicTask};
use crate::task::{Due, ScheduledTask, Task, MIN_PERIODIC_INTERVAL_MS, TASK_DELAY_THRESHOLD_MS};

/// Deferred/periodic task executor
///
/// Construction spawns the worker thread; [`TaskExecutor::stop`] (or drop)
/// wakes it, joins it and discards whatever is still queued. A stopped
/// executor cannot be restarted.
pub struct TaskExecutor {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the executor handle, its worker and periodic timers
pub(crate) struct Inner {
    queue: Mutex<BinaryHeap<ScheduledTask>>,
    wakeup: Condvar,
    enabled: AtomicBool,
    seq: AtomicU64,
}

impl TaskExecutor {
    /// Spawn the worker thread
    pub fn new() -> Result<Self> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            enabled: AtomicBool::new(true),
            seq: AtomicU64::new(0),
        });

        let worker_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("task-executor".to_string())
            .spawn(move || worker_inner.run())?;

        info!("Task executor started");
        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue a task
    ///
    /// A negative `delay_ms` runs the task before every timed task currently
    /// queued. Returns `false` (and drops the task) once the executor stopped.
    pub fn add<F>(&self, task: F, delay_ms: i64) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let due = Due::from_delay_ms(delay_ms, Instant::now());
        self.inner.push(due, Box::new(task))
    }

    /// Run `task` every `interval_ms`, starting one interval from now
    ///
    /// The next run is armed before the body executes, measured from the
    /// actual start of the current run, so a panicking body keeps the chain
    /// alive. The chain ends when the returned handle is cancelled or the
    /// executor stops.
    pub fn add_periodic<F>(&self, task: F, interval_ms: u64) -> Result<PeriodicHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval_ms < MIN_PERIODIC_INTERVAL_MS {
            return Err(TaskError::IntervalOutOfRange {
                interval_ms,
                min_ms: MIN_PERIODIC_INTERVAL_MS,
            });
        }
        if !self.is_running() {
            return Err(TaskError::Stopped);
        }

        let handle = PeriodicHandle::new();
        let periodic = Arc::new(PeriodicTask::new(
            Box::new(task),
            Duration::from_millis(interval_ms),
            handle.clone(),
            Arc::downgrade(&self.inner),
        ));
        if !periodic.schedule() {
            return Err(TaskError::Stopped);
        }

        debug!("Periodic task registered: interval={}ms", interval_ms);
        Ok(handle)
    }

    /// Whether the worker still accepts and runs tasks
    pub fn is_running(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Number of queued tasks (periodic timers count once)
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Stop the worker, join it and discard queued tasks
    ///
    /// Called from inside a task, the worker is not joined; it exits as soon
    /// as the current task returns.
    pub fn stop(&self) {
        let was_enabled = {
            let _queue = self.inner.queue.lock();
            self.inner.enabled.swap(false, Ordering::AcqRel)
        };
        self.inner.wakeup.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("Task executor stop requested from its own worker");
            } else if handle.join().is_err() {
                error!("Task executor worker terminated abnormally");
            }
        }

        // Tasks are dropped after the lock is released; their captures may
        // try to enqueue follow-up work.
        let dropped: Vec<ScheduledTask> = self.inner.queue.lock().drain().collect();
        if !dropped.is_empty() {
            debug!("Tasks dropped due to stop: {}", dropped.len());
        }
        drop(dropped);

        if was_enabled {
            info!("Task executor stopped");
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Inner {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn push(&self, due: Due, task: Task) -> bool {
        let mut queue = self.queue.lock();
        if !self.enabled.load(Ordering::Acquire) {
            drop(queue);
            warn!("Task rejected: executor stopped");
            return false;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        queue.push(ScheduledTask { due, seq, task });
        drop(queue);

        self.wakeup.notify_one();
        true
    }

    fn run(&self) {
        debug!("Task executor worker running");

        while let Some(scheduled) = self.next_due() {
            execute(scheduled);
        }

        let dropped: Vec<ScheduledTask> = self.queue.lock().drain().collect();
        if !dropped.is_empty() {
            debug!("Tasks dropped due to stop: {}", dropped.len());
        }
        drop(dropped);

        debug!("Task executor worker exited");
    }

    /// Block until a task is due or the executor is disabled
    fn next_due(&self) -> Option<ScheduledTask> {
        let mut queue = self.queue.lock();
        loop {
            if !self.enabled.load(Ordering::Acquire) {
                return None;
            }

            let head = queue.peek().map(|t| t.due);
            match head {
                None => self.wakeup.wait(&mut queue),
                Some(due) if due.is_ready(Instant::now()) => {
                    if let Some(task) = queue.pop() {
                        return Some(task);
                    }
                }
                Some(Due::At(deadline)) => {
                    self.wakeup.wait_until(&mut queue, deadline);
                }
                Some(Due::Immediate) => {}
            }
        }
    }
}

fn execute(scheduled: ScheduledTask) {
    let lateness = scheduled.due.lateness(Instant::now());
    if lateness > Duration::from_millis(TASK_DELAY_THRESHOLD_MS) {
        warn!(
            "Task started {}ms after its due time (seq={})",
            lateness.as_millis(),
            scheduled.seq
        );
    }

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(scheduled.task)) {
        error!("Task panicked: {}", panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}
