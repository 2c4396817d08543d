//! Fixed worker pool behind a bounded blocking queue.
//!
//! Producers and workers coordinate through one mutex and two condvars:
//! `not_full` gates blocked producers, `not_empty` gates idle workers.
//! Jobs always execute with no lock held.

use crate::error::{PoolError, PoolResult};
use crate::log::{Logger, NopLogger};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Unit of work executed by a pool worker.
pub(crate) type PoolJob = Box<dyn FnOnce() + Send>;

/// Smallest worker count `start` will spawn.
pub const MIN_POOL_THREADS: usize = 1;
/// Largest worker count `start` will spawn.
pub const MAX_POOL_THREADS: usize = 128;

/// Default capacity of the submission queue.
pub const DEFAULT_POOL_QUEUE_CAPACITY: usize = 1024;

/// Construction-time settings for [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool name; also the worker thread-name prefix (diagnostic only).
    pub name: String,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "tempo-pool".to_string(),
            queue_capacity: DEFAULT_POOL_QUEUE_CAPACITY,
        }
    }
}

/// Queue and signaling shared between producers and workers.
struct PoolShared {
    name: String,
    queue: Mutex<VecDeque<PoolJob>>,
    capacity: usize,
    /// Signaled when a job is enqueued or the pool stops.
    not_empty: Condvar,
    /// Signaled when a job is dequeued or the pool stops.
    not_full: Condvar,
    running: AtomicBool,
    logger: Arc<dyn Logger>,
}

/// Fixed set of worker threads pulling from a bounded queue.
///
/// Submissions block while the queue is full (or fail fast / time out via
/// the `try`/timeout variants) and are rejected once the pool is stopped. A
/// panicking job kills its worker thread; only [`WorkerPool::submit_with_result`]
/// captures panics, because its contract is to transport the outcome.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Pool with default configuration and a no-op logger.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Pool with the given thread-name prefix and default queue capacity.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::with_config(PoolConfig {
            name: name.into(),
            ..PoolConfig::default()
        })
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_config_and_logger(config, Arc::new(NopLogger))
    }

    pub fn with_config_and_logger(config: PoolConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: config.name,
                queue: Mutex::new(VecDeque::new()),
                capacity: config.queue_capacity,
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                running: AtomicBool::new(false),
                logger,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `count` workers; 0 means hardware concurrency. The count is
    /// clamped to `[MIN_POOL_THREADS, MAX_POOL_THREADS]`. Starting a running
    /// pool is a warn-level no-op.
    pub fn start(&self, count: usize) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            self.shared.logger.warn(&format!(
                "worker pool \"{}\" already running; start ignored",
                self.shared.name
            ));
            return;
        }

        let count = if count == 0 { num_cpus::get() } else { count }
            .clamp(MIN_POOL_THREADS, MAX_POOL_THREADS);

        let mut workers = self.workers.lock();
        for id in 0..count {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", self.shared.name, id))
                .spawn(move || worker_loop(id, shared))
                .expect("Failed to spawn worker thread");
            workers.push(handle);
        }

        self.shared.logger.info(&format!(
            "worker pool \"{}\" started with {} workers",
            self.shared.name, count
        ));
    }

    /// Enqueue a job, blocking while the queue is full.
    ///
    /// Returns false without enqueueing if the pool is (or becomes) stopped.
    pub fn add_task<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_job(Box::new(job))
    }

    /// As [`WorkerPool::add_task`], but gives up once `timeout` elapses with
    /// no room; the job is not enqueued on timeout.
    pub fn add_task_timeout<F>(&self, job: F, timeout: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        match self.enqueue(Box::new(job), Some(deadline)) {
            Ok(()) => true,
            Err(err) => {
                self.shared.logger.warn(&format!(
                    "job rejected by pool \"{}\": {}",
                    self.shared.name, err
                ));
                false
            }
        }
    }

    /// Enqueue without blocking; false when the queue is full or the pool is
    /// stopped.
    pub fn try_add_task<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            self.shared.logger.error(&format!(
                "job rejected by pool \"{}\": queue is full",
                self.shared.name
            ));
            return false;
        }
        queue.push_back(Box::new(job));
        self.shared.not_empty.notify_one();
        true
    }

    /// Run `job` on a worker and hand its outcome back through a
    /// [`TaskFuture`].
    ///
    /// The job's return value (or its panic payload, if it panicked) is
    /// captured and surfaced the way `JoinHandle::join` surfaces it. Blocks
    /// while the queue is full, like [`WorkerPool::add_task`].
    pub fn submit_with_result<F, R>(&self, job: F) -> PoolResult<TaskFuture<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::new(FutureState {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        let worker_state = Arc::clone(&state);
        let wrapped: PoolJob = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            *worker_state.result.lock() = Some(outcome);
            worker_state.ready.notify_all();
        });

        self.enqueue(wrapped, None)?;
        Ok(TaskFuture { state })
    }

    /// As [`WorkerPool::submit_with_result`], with a bound on the wait for
    /// queue room.
    pub fn submit_with_result_timeout<F, R>(
        &self,
        job: F,
        timeout: Duration,
    ) -> PoolResult<TaskFuture<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::new(FutureState {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        let worker_state = Arc::clone(&state);
        let wrapped: PoolJob = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            *worker_state.result.lock() = Some(outcome);
            worker_state.ready.notify_all();
        });

        self.enqueue(wrapped, Some(Instant::now() + timeout))?;
        Ok(TaskFuture { state })
    }

    /// Stop the pool. Workers finish the queued backlog and exit; blocked
    /// producers are released and report failure; new submissions are
    /// rejected immediately.
    ///
    /// With `defer_cleanup` false, joins the workers before returning (may
    /// block behind the backlog and an in-flight job). With true, the join
    /// is deferred to drop, for callers that cannot afford to block behind
    /// long-running jobs. Stopping a stopped pool is a warn-level no-op.
    pub fn stop(&self, defer_cleanup: bool) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.logger.warn(&format!(
                "worker pool \"{}\" already stopped; stop ignored",
                self.shared.name
            ));
            return;
        }

        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        self.shared.logger.info(&format!(
            "worker pool \"{}\" stopping",
            self.shared.name
        ));

        if !defer_cleanup {
            self.cleanup();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Jobs waiting in the queue.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Name the pool was created with.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub(crate) fn add_job(&self, job: PoolJob) -> bool {
        match self.enqueue(job, None) {
            Ok(()) => true,
            Err(err) => {
                self.shared.logger.warn(&format!(
                    "job rejected by pool \"{}\": {}",
                    self.shared.name, err
                ));
                false
            }
        }
    }

    /// Common enqueue path: waits for room on `not_full`, bounded by the
    /// optional deadline.
    fn enqueue(&self, job: PoolJob, deadline: Option<Instant>) -> PoolResult<()> {
        let mut queue = self.shared.queue.lock();
        loop {
            if !self.shared.running.load(Ordering::Acquire) {
                return Err(PoolError::Stopped);
            }
            if queue.len() < self.shared.capacity {
                queue.push_back(job);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .not_full
                        .wait_until(&mut queue, deadline)
                        .timed_out()
                    {
                        return Err(PoolError::Timeout);
                    }
                }
                None => {
                    self.shared.not_full.wait(&mut queue);
                }
            }
        }
    }

    /// Join the workers; the backlog has been executed once they exit.
    fn cleanup(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                self.shared.logger.error(&format!(
                    "worker of pool \"{}\" terminated by panic",
                    self.shared.name
                ));
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a running pool behaves like stop(false).
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.not_empty.notify_all();
            self.shared.not_full.notify_all();
        }
        self.cleanup();
    }
}

/// Worker main loop: take a job, run it, repeat. Exits once the pool is
/// stopped and the backlog is drained.
fn worker_loop(id: usize, shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    shared.not_full.notify_one();
                    break Some(job);
                }
                if !shared.running.load(Ordering::Acquire) {
                    break None;
                }
                shared.not_empty.wait(&mut queue);
            }
        };

        match job {
            Some(job) => job(),
            None => break,
        }
    }

    shared
        .logger
        .debug(&format!("worker {} of pool \"{}\" exiting", id, shared.name));
}

/// Future-like handle to the outcome of a pool job.
pub struct TaskFuture<R> {
    state: Arc<FutureState<R>>,
}

struct FutureState<R> {
    result: Mutex<Option<thread::Result<R>>>,
    ready: Condvar,
}

impl<R> TaskFuture<R> {
    /// Block until the job finishes; returns its value, or the panic payload
    /// if it panicked, as `JoinHandle::join` does.
    pub fn wait(self) -> thread::Result<R> {
        let mut result = self.state.result.lock();
        loop {
            if let Some(outcome) = result.take() {
                return outcome;
            }
            self.state.ready.wait(&mut result);
        }
    }

    /// As [`TaskFuture::wait`], but gives up after `timeout`; the handle
    /// stays usable.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<thread::Result<R>> {
        let deadline = Instant::now() + timeout;
        let mut result = self.state.result.lock();
        loop {
            if let Some(outcome) = result.take() {
                return Some(outcome);
            }
            if self.state.ready.wait_until(&mut result, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Whether the outcome is already available.
    pub fn is_ready(&self) -> bool {
        self.state.result.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pool_executes_tasks() {
        let pool = WorkerPool::with_name("test");
        pool.start(2);

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = count.clone();
            assert!(pool.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 10);

        pool.stop(false);
    }

    #[test]
    fn test_add_task_fails_when_stopped() {
        let pool = WorkerPool::with_name("test");
        assert!(!pool.add_task(|| {}));

        pool.start(1);
        assert!(pool.add_task(|| {}));
        pool.stop(false);
        assert!(!pool.add_task(|| {}));
    }

    #[test]
    fn test_start_clamps_and_is_idempotent() {
        let pool = WorkerPool::with_name("test");
        pool.start(1);
        assert!(pool.is_running());

        // Starting again is a no-op.
        pool.start(4);
        assert!(pool.is_running());

        pool.stop(false);
        assert!(!pool.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let pool = WorkerPool::with_name("test");
        pool.start(1);

        pool.stop(false);
        pool.stop(false);
        assert!(!pool.is_running());
    }

    #[test]
    fn test_add_task_timeout_on_full_queue() {
        let pool = WorkerPool::with_config(PoolConfig {
            name: "test".to_string(),
            queue_capacity: 1,
        });
        pool.start(1);

        // Occupy the single worker, then fill the single queue slot.
        pool.add_task(|| thread::sleep(Duration::from_millis(400)));
        thread::sleep(Duration::from_millis(50));
        assert!(pool.add_task(|| {}));

        let started = Instant::now();
        assert!(!pool.add_task_timeout(|| {}, Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(300));

        pool.stop(false);
    }

    #[test]
    fn test_try_add_task_fails_fast_on_full_queue() {
        let pool = WorkerPool::with_config(PoolConfig {
            name: "test".to_string(),
            queue_capacity: 1,
        });
        pool.start(1);

        pool.add_task(|| thread::sleep(Duration::from_millis(300)));
        thread::sleep(Duration::from_millis(50));
        assert!(pool.try_add_task(|| {}));
        assert!(!pool.try_add_task(|| {}));

        pool.stop(false);
    }

    #[test]
    fn test_submit_with_result_returns_value() {
        let pool = WorkerPool::with_name("test");
        pool.start(2);

        let future = pool
            .submit_with_result(|| 6 * 7)
            .expect("pool is running");
        assert_eq!(future.wait().ok(), Some(42));

        pool.stop(false);
    }

    #[test]
    fn test_submit_with_result_captures_panic() {
        let pool = WorkerPool::with_name("test");
        pool.start(1);

        let future = pool
            .submit_with_result(|| -> i32 { panic!("job went wrong") })
            .expect("pool is running");
        assert!(future.wait().is_err());

        // The worker that ran the wrapped job survives.
        let future = pool.submit_with_result(|| 1).expect("pool is running");
        assert_eq!(future.wait().ok(), Some(1));

        pool.stop(false);
    }

    #[test]
    fn test_submit_with_result_on_stopped_pool() {
        let pool = WorkerPool::with_name("test");
        let result = pool.submit_with_result(|| 1);
        assert_eq!(result.err(), Some(PoolError::Stopped));
    }

    #[test]
    fn test_future_wait_timeout_and_is_ready() {
        let pool = WorkerPool::with_name("test");
        pool.start(1);

        let future = pool
            .submit_with_result(|| {
                thread::sleep(Duration::from_millis(200));
                7
            })
            .expect("pool is running");

        assert!(!future.is_ready());
        assert!(future.wait_timeout(Duration::from_millis(20)).is_none());

        let outcome = future.wait_timeout(Duration::from_millis(500));
        assert_eq!(outcome.and_then(|r| r.ok()), Some(7));

        pool.stop(false);
    }

    #[test]
    fn test_deferred_cleanup_does_not_block_stop() {
        let pool = WorkerPool::with_name("test");
        pool.start(1);

        pool.add_task(|| thread::sleep(Duration::from_millis(300)));
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        pool.stop(true);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!pool.is_running());
        // Drop joins the worker once the in-flight job finishes.
    }
}
