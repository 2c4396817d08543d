//! Periodic timer tasks and the deadline-ordered heap that schedules them.
//!
//! A timer task is owned jointly by the heap and by the one handle returned
//! to the poster. Cancellation is cooperative: the handle revokes the task,
//! and the loop thread drops it at its next observation.

use crate::log::Logger;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Repeat sentinel: fire until cancelled.
pub const REPEAT_FOREVER: i64 = -1;

/// Sleep bound when no timer is pending, so the loop still observes state
/// changes such as `stop()` within one tick.
pub(crate) const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Zero-argument unit of work invoked on every fire.
pub(crate) type TimerCallback = Box<dyn FnMut() + Send>;

/// A named periodic task.
///
/// Shared between the timer heap and any outstanding [`TimerHandle`]. The
/// callback and deadline are only ever touched by the thread processing due
/// tasks; `remaining` is also written by `cancel()` from arbitrary threads.
pub(crate) struct TimerTask {
    name: String,
    period: Duration,
    /// Fires left: positive counter, [`REPEAT_FOREVER`], or 0 once dead.
    /// `remaining == 0` means permanently invalid: the task must never fire
    /// again and must never re-enter the heap.
    remaining: AtomicI64,
    /// Set only by revocation, never by running out of repeats. Lets a
    /// dispatched-but-not-started invocation tell a cancelled task from one
    /// merely spending its last repeat.
    cancelled: AtomicBool,
    callback: Mutex<TimerCallback>,
}

impl TimerTask {
    pub(crate) fn new(
        name: impl Into<String>,
        period: Duration,
        repeat: i64,
        callback: TimerCallback,
    ) -> Arc<Self> {
        let remaining = if repeat < 0 { REPEAT_FOREVER } else { repeat };
        Arc::new(Self {
            name: name.into(),
            period,
            remaining: AtomicI64::new(remaining),
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(callback),
        })
    }

    /// Diagnostic name the task was posted under.
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    /// Whether the task still has fires left.
    pub(crate) fn is_alive(&self) -> bool {
        self.remaining.load(AtomicOrdering::Acquire) != 0
    }

    /// Whether the task was explicitly revoked.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }

    /// Revoke the task: no new invocation may begin after this returns.
    pub(crate) fn kill(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
        self.remaining.store(0, AtomicOrdering::Release);
    }

    /// Invoke the callback.
    pub(crate) fn fire(&self) {
        (self.callback.lock())();
    }

    /// Consume one repeat; false once the task is spent or cancelled.
    ///
    /// A CAS loop rather than `fetch_sub`: a concurrent `cancel()` stores 0,
    /// and a blind decrement would resurrect the task as infinite (-1).
    pub(crate) fn consume_repeat(&self) -> bool {
        let mut current = self.remaining.load(AtomicOrdering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            if current < 0 {
                return true;
            }
            match self.remaining.compare_exchange_weak(
                current,
                current - 1,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            ) {
                Ok(_) => return current > 1,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Revocable, non-owning reference to a posted timer task.
///
/// Exactly one handle exists per posted timer; it is movable but not
/// copyable, so revocation stays unambiguous. A handle that outlives its
/// task reports invalid instead of dangling.
pub struct TimerHandle {
    task: Weak<TimerTask>,
}

impl TimerHandle {
    pub(crate) fn new(task: &Arc<TimerTask>) -> Self {
        Self {
            task: Arc::downgrade(task),
        }
    }

    /// Handle that was never attached to a task; returned when posting is
    /// rejected.
    pub fn invalid() -> Self {
        Self { task: Weak::new() }
    }

    /// Revoke the task. An invocation already in flight still completes;
    /// no invocation begins after this returns.
    pub fn cancel(&self) {
        if let Some(task) = self.task.upgrade() {
            task.kill();
        }
    }

    /// Whether the referenced task still exists and has fires left.
    pub fn is_valid(&self) -> bool {
        self.task.upgrade().map_or(false, |task| task.is_alive())
    }
}

/// Heap entry: a task and its next deadline.
pub(crate) struct TimerEntry {
    pub(crate) next_fire: Instant,
    pub(crate) task: Arc<TimerTask>,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.next_fire.cmp(&self.next_fire)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire == other.next_fire
    }
}

impl Eq for TimerEntry {}

impl TimerEntry {
    /// Re-arm after a fire.
    ///
    /// Consumes one repeat and advances the deadline by one period. When the
    /// new deadline has already fallen more than one full period behind
    /// `now`, the deadline resynchronizes to `now`: a stalled loop re-fires
    /// once immediately instead of bursting through every missed period.
    /// Returns `None` when the task is spent or cancelled and must not be
    /// re-inserted.
    pub(crate) fn rearm(mut self, now: Instant, logger: &dyn Logger) -> Option<Self> {
        if !self.task.consume_repeat() {
            return None;
        }

        self.next_fire += self.task.period();
        if now.saturating_duration_since(self.next_fire) > self.task.period() {
            logger.warn(&format!(
                "timer \"{}\" fell more than one period behind; resynchronizing to now",
                self.task.name()
            ));
            self.next_fire = now;
        }

        // Cancelled between the fire and here: drop instead of re-inserting.
        if !self.task.is_alive() {
            return None;
        }
        Some(self)
    }
}

/// Min-ordered structure over timer tasks keyed by next fire time.
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    capacity: usize,
}

impl TimerHeap {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
        }
    }

    /// Admission-checked insert; false when at capacity.
    pub(crate) fn insert(&mut self, entry: TimerEntry) -> bool {
        if self.heap.len() >= self.capacity {
            return false;
        }
        self.heap.push(entry);
        true
    }

    /// Re-insert a just-popped entry. Popping freed its slot, so there is no
    /// admission check.
    pub(crate) fn reinsert(&mut self, entry: TimerEntry) {
        self.heap.push(entry);
    }

    /// Time until the soonest deadline (zero if overdue), or [`IDLE_WAIT`]
    /// when no timers are pending.
    pub(crate) fn next_deadline(&self, now: Instant) -> Duration {
        match self.heap.peek() {
            Some(entry) => entry.next_fire.saturating_duration_since(now),
            None => IDLE_WAIT,
        }
    }

    /// Remove and return every entry due at `now`, soonest first.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<TimerEntry> {
        let mut due = Vec::new();
        while self
            .heap
            .peek()
            .map_or(false, |entry| entry.next_fire <= now)
        {
            if let Some(entry) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
