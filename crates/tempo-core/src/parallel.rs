//! Event loop variant that executes due work on a worker pool.
//!
//! The loop thread keeps sole ownership of dispatch: due timers and drained
//! one-shot tasks are handed to the pool in the same order the base loop
//! would have executed them. Completion order is unspecified and
//! parallelism is bounded by the worker count.

use crate::event_loop::{EventLoop, EventLoopConfig, Executor};
use crate::log::{Logger, NopLogger};
use crate::pool::{PoolConfig, WorkerPool};
use crate::timer::TimerHandle;
use std::sync::Arc;
use std::time::Duration;

/// Event loop whose due timer callbacks and one-shot tasks run on an
/// internal worker pool instead of inline.
pub struct ParallelEventLoop {
    base: EventLoop,
    pool: Arc<WorkerPool>,
}

impl ParallelEventLoop {
    /// Loop with default configuration and a no-op logger.
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Self {
        Self::with_config_and_logger(config, Arc::new(NopLogger))
    }

    pub fn with_config_and_logger(config: EventLoopConfig, logger: Arc<dyn Logger>) -> Self {
        let pool_config = PoolConfig {
            name: format!("{}-pool", config.name),
            ..PoolConfig::default()
        };
        let pool = Arc::new(WorkerPool::with_config_and_logger(
            pool_config,
            Arc::clone(&logger),
        ));
        let base = EventLoop::with_executor(config, logger, Executor::Pool(Arc::clone(&pool)));
        Self { base, pool }
    }

    /// Start the pool with `workers` threads (0 = hardware concurrency),
    /// then run the loop on the calling thread until `stop()`.
    pub fn start(&self, workers: usize) {
        self.pool.start(workers);
        self.base.start();
    }

    /// Stop the loop first, then the pool.
    ///
    /// Pool cleanup is deferred to drop: `stop()` must stay callable from a
    /// dispatched callback, where a synchronous join would deadlock on the
    /// caller's own worker thread.
    pub fn stop(&self) {
        self.base.stop();
        self.pool.stop(true);
    }

    /// See [`EventLoop::post_event`].
    pub fn post_event<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.base.post_event(task)
    }

    /// See [`EventLoop::post_timer_event`].
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
        self.base.post_timer_event(name, period, repeat, callback)
    }

    pub fn is_running(&self) -> bool {
        self.base.is_running()
    }

    pub fn is_loop_thread(&self) -> bool {
        self.base.is_loop_thread()
    }

    /// The pool executing dispatched work.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Default for ParallelEventLoop {
    fn default() -> Self {
        Self::new()
    }
}
