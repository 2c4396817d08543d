//! Tempo: a cooperative task scheduler
//!
//! An event loop that interleaves one-shot tasks with periodic timer tasks,
//! a fixed worker pool behind a bounded blocking queue, and a parallel loop
//! variant that dispatches due work to the pool instead of running it
//! inline.
//!
//! The base loop is single-threaded cooperative: [`EventLoop::start`] runs
//! on the calling thread and serializes all callbacks. Posting is
//! thread-safe from any thread and wakes the sleeping loop. Backpressure is
//! explicit everywhere: full queues reject (or block, on the pool's
//! blocking submit) rather than grow without bound.
//!
//! Diagnostics go through an injected [`Logger`]; the default is a no-op,
//! and [`TracingLogger`] forwards to `tracing` for embedders that already
//! run a subscriber.

mod error;
mod event_loop;
mod log;
mod parallel;
mod pool;
mod queue;
mod timer;

pub use error::{PoolError, PoolResult};
pub use event_loop::{
    EventLoop, EventLoopConfig, DEFAULT_TASK_QUEUE_CAPACITY, DEFAULT_TICK,
    DEFAULT_TIMER_QUEUE_CAPACITY,
};
pub use log::{LogLevel, Logger, NopLogger, TracingLogger};
pub use parallel::ParallelEventLoop;
pub use pool::{
    PoolConfig, TaskFuture, WorkerPool, DEFAULT_POOL_QUEUE_CAPACITY, MAX_POOL_THREADS,
    MIN_POOL_THREADS,
};
pub use queue::TaskQueue;
pub use timer::{TimerHandle, REPEAT_FOREVER};
