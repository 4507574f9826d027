//! Queue entries and scheduling primitives

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

/// Minimum interval accepted for periodic tasks
pub const MIN_PERIODIC_INTERVAL_MS: u64 = 50;

/// Start delay after which a task logs a warning
pub const TASK_DELAY_THRESHOLD_MS: u64 = 100;

/// A deferred unit of work
///
/// Tasks must only hold weak references (or handles) to the objects they
/// manipulate and turn into a no-op when those objects are gone.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Scheduled start of a task
///
/// `Immediate` orders before every `At`, regardless of insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Due {
    /// Runs before any timed entry
    Immediate,
    /// Runs once the instant has been reached
    At(Instant),
}

impl Due {
    /// Negative delays map to [`Due::Immediate`]
    pub fn from_delay_ms(delay_ms: i64, now: Instant) -> Self {
        if delay_ms < 0 {
            Due::Immediate
        } else {
            Due::At(now + Duration::from_millis(delay_ms as u64))
        }
    }

    /// Whether the task may start at `now`
    pub fn is_ready(&self, now: Instant) -> bool {
        match self {
            Due::Immediate => true,
            Due::At(at) => *at <= now,
        }
    }

    /// How late a task starting at `now` is
    pub fn lateness(&self, now: Instant) -> Duration {
        match self {
            Due::Immediate => Duration::ZERO,
            Due::At(at) => now.saturating_duration_since(*at),
        }
    }
}

/// Heap entry. `BinaryHeap` is a max-heap, so ordering is reversed to pop the
/// earliest entry first; `seq` keeps insertion order among equal deadlines.
pub(crate) struct ScheduledTask {
    pub(crate) due: Due,
    pub(crate) seq: u64,
    pub(crate) task: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("due", &self.due)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
