//! Leveled logging seam for the scheduler.
//!
//! The scheduler never talks to a global logger. Callers inject a [`Logger`]
//! at construction time; the default is a no-op, so the core runs correctly
//! with no logging backend configured at all.

use std::fmt;

/// Severity of a scheduler diagnostic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Sink for scheduler diagnostics.
///
/// Implementations must be cheap when the level is filtered out: the
/// scheduler calls this from the loop thread and from pool workers.
pub trait Logger: Send + Sync {
    /// Record one message at the given level.
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Logger that discards everything. The default.
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Forwards each message to the `tracing` macro of the matching level, for
/// embedders that already run a `tracing` subscriber.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }
}
