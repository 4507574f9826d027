//! Voltage Tasks - deferred and periodic work off the network I/O path
//!
//! A [`TaskExecutor`] owns exactly one worker thread that drains a
//! time-ordered queue of callbacks:
//!
//! ```text
//! add(task, -1)  ──┐
//! add(task, 250) ──┼──▶ ┌──────────────────┐      ┌───────────────┐
//! add_periodic() ──┘    │  BinaryHeap      │─────▶│ worker thread │──▶ task()
//!                       │  Immediate < At  │◀─────│  (Condvar)    │
//!                       └──────────────────┘ wake └───────────────┘
//! ```
//!
//! - Tasks run serially and never overlap each other.
//! - Immediate tasks (negative delay) always run before timed tasks.
//! - A panicking task is logged and does not stop the loop.
//! - Stopping the executor discards queued work.
//!
//! Periodic work is modelled by [`PeriodicHandle`], a cancellation token for a
//! repeating timer that re-arms itself before each run.

mod error;
mod executor;
mod periodic;
mod task;

pub use error::{Result, TaskError};
pub use executor::TaskExecutor;
pub use periodic::PeriodicHandle;
pub use task::{Due, Task, MIN_PERIODIC_INTERVAL_MS, TASK_DELAY_THRESHOLD_MS};
