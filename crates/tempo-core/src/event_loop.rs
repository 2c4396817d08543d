//! Event loop core: a wait/wake cycle interleaving one-shot tasks with
//! periodic timers.
//!
//! `start()` runs the loop on the calling thread; posting is thread-safe
//! from anywhere. Each iteration handles due timers, then drains and
//! executes the one-shot batch, then sleeps until the next deadline or an
//! external wake. The base loop executes everything inline on the loop
//! thread; the parallel variant swaps the executor for a worker pool.

use crate::log::{Logger, NopLogger};
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::timer::{TimerEntry, TimerHandle, TimerHeap, TimerTask};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// One-shot unit of work.
pub(crate) type EventTask = Box<dyn FnOnce() + Send>;

/// Default capacity of the one-shot task queue.
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 1024;
/// Default admission capacity of the timer heap.
pub const DEFAULT_TIMER_QUEUE_CAPACITY: usize = 256;
/// Default upper bound on one sleep.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Construction-time settings for [`EventLoop`].
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Loop name, used in diagnostics (and as the pool-name prefix in the
    /// parallel variant).
    pub name: String,
    /// Capacity of the one-shot task queue.
    pub task_queue_capacity: usize,
    /// Admission capacity of the timer heap.
    pub timer_queue_capacity: usize,
    /// Upper bound on one sleep, so the loop observes `stop()` within one
    /// tick even with no timers pending and no external wake.
    pub default_tick: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            name: "tempo-loop".to_string(),
            task_queue_capacity: DEFAULT_TASK_QUEUE_CAPACITY,
            timer_queue_capacity: DEFAULT_TIMER_QUEUE_CAPACITY,
            default_tick: DEFAULT_TICK,
        }
    }
}

/// How due work is executed: inline on the loop thread, or handed to a pool.
pub(crate) enum Executor {
    Inline,
    Pool(Arc<WorkerPool>),
}

/// Cooperative event loop.
///
/// Exactly one thread executes callbacks at a time, serializing all task
/// side effects: one-shot tasks posted from a single thread run FIFO
/// relative to each other, and timer tasks fire in deadline order,
/// interleaved with one-shot batches per iteration. Backpressure is
/// explicit: full queues reject rather than grow.
pub struct EventLoop {
    config: EventLoopConfig,
    tasks: TaskQueue<EventTask>,
    timers: Mutex<TimerHeap>,
    running: AtomicBool,
    loop_thread: Mutex<Option<ThreadId>>,
    /// Wake flag; set by posters and `stop()`, consumed by the waiter.
    wake: Mutex<bool>,
    waker: Condvar,
    executor: Executor,
    logger: Arc<dyn Logger>,
}

impl EventLoop {
    /// Loop with default configuration and a no-op logger.
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Self {
        Self::with_config_and_logger(config, Arc::new(NopLogger))
    }

    pub fn with_config_and_logger(config: EventLoopConfig, logger: Arc<dyn Logger>) -> Self {
        Self::with_executor(config, logger, Executor::Inline)
    }

    pub(crate) fn with_executor(
        config: EventLoopConfig,
        logger: Arc<dyn Logger>,
        executor: Executor,
    ) -> Self {
        Self {
            tasks: TaskQueue::new(config.task_queue_capacity),
            timers: Mutex::new(TimerHeap::new(config.timer_queue_capacity)),
            running: AtomicBool::new(false),
            loop_thread: Mutex::new(None),
            wake: Mutex::new(false),
            waker: Condvar::new(),
            executor,
            logger,
            config,
        }
    }

    /// Post a one-shot task for execution on the loop.
    ///
    /// Returns false (the task is dropped and an error is logged) when the
    /// queue is full. Posting to a stopped loop queues the task for the next
    /// `start()`. The loop's waiter is woken only when this insertion took
    /// the queue from empty to non-empty; a non-empty queue has a wake
    /// already pending.
    pub fn post_event<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.tasks.try_enqueue(Box::new(task)) {
            Ok(was_empty) => {
                if was_empty {
                    self.wake_waiter();
                }
                true
            }
            Err(_) => {
                self.logger.error(&format!(
                    "event loop \"{}\": one-shot task rejected, queue is full",
                    self.config.name
                ));
                false
            }
        }
    }

    /// Schedule a periodic task; the first fire is one period from now.
    ///
    /// `repeat` is the number of fires; any negative value means until
    /// cancelled. Returns the one cancelable handle for the task, or an
    /// invalid handle (with a log line) when `repeat` is zero or the timer
    /// heap is at capacity.
    pub fn post_timer_event<F>(
        &self,
        name: &str,
        period: Duration,
        repeat: i64,
        callback: F,
    ) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        if repeat == 0 {
            self.logger.warn(&format!(
                "event loop \"{}\": timer \"{}\" posted with zero repeats; ignoring",
                self.config.name, name
            ));
            return TimerHandle::invalid();
        }

        let task = TimerTask::new(name, period, repeat, Box::new(callback));
        let handle = TimerHandle::new(&task);
        let entry = TimerEntry {
            next_fire: Instant::now() + period,
            task,
        };

        if !self.timers.lock().insert(entry) {
            self.logger.error(&format!(
                "event loop \"{}\": timer \"{}\" rejected, timer queue is full",
                self.config.name, name
            ));
            return TimerHandle::invalid();
        }

        self.wake_waiter();
        handle
    }

    /// Run the loop on the calling thread until `stop()` is observed.
    ///
    /// Starting a running loop (including from inside one of its own
    /// callbacks) is a warn-level no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            self.logger.warn(&format!(
                "event loop \"{}\" already running; start ignored",
                self.config.name
            ));
            return;
        }

        *self.loop_thread.lock() = Some(thread::current().id());
        self.logger
            .info(&format!("event loop \"{}\" started", self.config.name));

        while self.running.load(Ordering::Acquire) {
            self.process_due_timers();
            self.run_pending_tasks();
            self.wait_for_work();
        }

        *self.loop_thread.lock() = None;
        self.logger
            .info(&format!("event loop \"{}\" stopped", self.config.name));
    }

    /// Clear the running flag and wake the waiter; the loop exits within one
    /// wait cycle. Stopping a stopped loop is a warn-level no-op. Safe to
    /// call from any thread, including from inside a callback.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            self.logger.warn(&format!(
                "event loop \"{}\" already stopped; stop ignored",
                self.config.name
            ));
            return;
        }
        self.wake_waiter();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the caller is the thread currently running the loop.
    pub fn is_loop_thread(&self) -> bool {
        *self.loop_thread.lock() == Some(thread::current().id())
    }

    /// One-shot tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Timers currently scheduled.
    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Pop every due timer and execute it per the configured executor.
    ///
    /// The heap lock is released before any callback runs; re-arming takes
    /// it again briefly per entry.
    fn process_due_timers(&self) {
        let due = self.timers.lock().pop_due(Instant::now());
        for entry in due {
            if entry.task.is_cancelled() {
                self.logger.debug(&format!(
                    "timer \"{}\" cancelled; dropping",
                    entry.task.name()
                ));
                continue;
            }

            match &self.executor {
                Executor::Inline => {
                    entry.task.fire();
                    if let Some(rearmed) = entry.rearm(Instant::now(), &*self.logger) {
                        self.timers.lock().reinsert(rearmed);
                    }
                }
                Executor::Pool(pool) => {
                    // Re-arm at dispatch; the dispatched job re-checks for
                    // cancellation so a cancel between dispatch and
                    // execution still wins.
                    let task = Arc::clone(&entry.task);
                    if let Some(rearmed) = entry.rearm(Instant::now(), &*self.logger) {
                        self.timers.lock().reinsert(rearmed);
                    }
                    let dispatched = pool.add_task(move || {
                        if !task.is_cancelled() {
                            task.fire();
                        }
                    });
                    if !dispatched {
                        self.logger.error(&format!(
                            "event loop \"{}\": timer dispatch rejected, worker pool stopped",
                            self.config.name
                        ));
                    }
                }
            }
        }
    }

    /// Drain the one-shot batch in one lock acquisition, then execute with
    /// no lock held, so tasks are free to post more work.
    fn run_pending_tasks(&self) {
        for task in self.tasks.drain_all() {
            match &self.executor {
                Executor::Inline => task(),
                Executor::Pool(pool) => {
                    if !pool.add_job(task) {
                        self.logger.error(&format!(
                            "event loop \"{}\": one-shot dispatch rejected, worker pool stopped",
                            self.config.name
                        ));
                    }
                }
            }
        }
    }

    /// Sleep until the next timer deadline, the default tick, or an external
    /// wake, whichever comes first. Deadline-based, so time already spent
    /// processing shortens the wait instead of drifting it.
    fn wait_for_work(&self) {
        let sleep = self
            .timers
            .lock()
            .next_deadline(Instant::now())
            .min(self.config.default_tick);
        let deadline = Instant::now() + sleep;

        let mut woken = self.wake.lock();
        while !*woken && self.running.load(Ordering::Acquire) {
            if self.waker.wait_until(&mut woken, deadline).timed_out() {
                break;
            }
        }
        *woken = false;
    }

    fn wake_waiter(&self) {
        let mut woken = self.wake.lock();
        *woken = true;
        self.waker.notify_one();
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::test_util::CapturingLogger;
    use crate::log::LogLevel;
    use crate::timer::REPEAT_FOREVER;
    use std::sync::atomic::AtomicUsize;

    fn small_config() -> EventLoopConfig {
        EventLoopConfig {
            default_tick: Duration::from_millis(20),
            ..EventLoopConfig::default()
        }
    }

    #[test]
    fn test_post_before_start_respects_capacity() {
        let el = EventLoop::with_config(EventLoopConfig {
            task_queue_capacity: 2,
            ..EventLoopConfig::default()
        });

        assert!(el.post_event(|| {}));
        assert!(el.post_event(|| {}));
        assert!(!el.post_event(|| {}));
        assert_eq!(el.pending_tasks(), 2);
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let el = Arc::new(EventLoop::with_config(small_config()));
        assert!(!el.is_running());

        let runner = el.clone();
        let handle = thread::spawn(move || runner.start());

        thread::sleep(Duration::from_millis(50));
        assert!(el.is_running());
        assert!(!el.is_loop_thread());

        el.stop();
        handle.join().expect("loop thread exits cleanly");
        assert!(!el.is_running());

        // Stopping again is a warn-level no-op.
        el.stop();
        assert!(!el.is_running());
    }

    #[test]
    fn test_redundant_start_warns() {
        let messages = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let logger = Arc::new(CapturingLogger {
            messages: messages.clone(),
        });
        let el = Arc::new(EventLoop::with_config_and_logger(small_config(), logger));

        let runner = el.clone();
        let handle = thread::spawn(move || runner.start());
        thread::sleep(Duration::from_millis(50));

        // Second start from another thread returns immediately.
        el.start();

        el.stop();
        handle.join().expect("loop thread exits cleanly");

        let seen = messages.lock();
        assert!(seen
            .iter()
            .any(|(level, msg)| *level == LogLevel::Warn && msg.contains("already running")));
    }

    #[test]
    fn test_executes_posted_tasks() {
        let el = Arc::new(EventLoop::with_config(small_config()));
        let count = Arc::new(AtomicUsize::new(0));

        let runner = el.clone();
        let handle = thread::spawn(move || runner.start());

        for _ in 0..5 {
            let counter = count.clone();
            assert!(el.post_event(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 5);

        el.stop();
        handle.join().expect("loop thread exits cleanly");
    }

    #[test]
    fn test_is_loop_thread_inside_callback() {
        let el = Arc::new(EventLoop::with_config(small_config()));
        let observed = Arc::new(AtomicBool::new(false));

        let runner = el.clone();
        let handle = thread::spawn(move || runner.start());

        let inner = el.clone();
        let flag = observed.clone();
        el.post_event(move || {
            flag.store(inner.is_loop_thread(), Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(observed.load(Ordering::SeqCst));
        assert!(!el.is_loop_thread());

        el.stop();
        handle.join().expect("loop thread exits cleanly");
    }

    #[test]
    fn test_timer_zero_repeat_rejected() {
        let el = EventLoop::with_config(small_config());
        let handle = el.post_timer_event("noop", Duration::from_millis(10), 0, || {});
        assert!(!handle.is_valid());
        assert_eq!(el.active_timers(), 0);
    }

    #[test]
    fn test_timer_capacity_rejected() {
        let el = EventLoop::with_config(EventLoopConfig {
            timer_queue_capacity: 1,
            ..small_config()
        });

        let first = el.post_timer_event("a", Duration::from_millis(10), REPEAT_FOREVER, || {});
        assert!(first.is_valid());

        let second = el.post_timer_event("b", Duration::from_millis(10), REPEAT_FOREVER, || {});
        assert!(!second.is_valid());
        assert_eq!(el.active_timers(), 1);
    }

    #[test]
    fn test_stop_observed_without_external_wake() {
        // With no timers and no posts, the default tick bounds the sleep.
        let el = Arc::new(EventLoop::with_config(EventLoopConfig {
            default_tick: Duration::from_millis(30),
            ..EventLoopConfig::default()
        }));

        let runner = el.clone();
        let handle = thread::spawn(move || runner.start());
        thread::sleep(Duration::from_millis(50));

        el.stop();
        handle.join().expect("loop thread exits within one tick");
    }
}
