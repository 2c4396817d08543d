//! Scheduler error types.

use thiserror::Error;

/// Errors from result-bearing pool submissions.
///
/// Plain submissions report failure as a boolean plus a log line; the typed
/// variants exist where the caller needs to tell a stopped pool from a
/// timed-out wait.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool was stopped before the job could be enqueued.
    #[error("worker pool is not running")]
    Stopped,

    /// The bounded wait for queue room elapsed; the job was not enqueued.
    #[error("timed out waiting for queue room")]
    Timeout,
}

/// Result of pool submission operations.
pub type PoolResult<T> = Result<T, PoolError>;
