//! Pluggable log output for the engines.
//!
//! Engines talk a lot when asked to: every copy, every file that goes
//! into a combine, every zip entry. That chatter goes through a
//! [`LogSink`] picked once at construction and gated by a single
//! `debug` switch, so call sites never branch on where output goes.

use std::fmt;
use std::sync::Arc;

/// Somewhere to send engine log lines.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards lines to `tracing` at debug level. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _message: &str) {}
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// A sink plus the debug switch that gates it.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    debug: bool,
}

impl Logger {
    /// Creates a logger that writes to `sink` when `debug` is on.
    pub fn new(sink: Arc<dyn LogSink>, debug: bool) -> Self {
        Self { sink, debug }
    }

    /// Logger backed by [`TracingSink`].
    pub fn tracing(debug: bool) -> Self {
        Self::new(Arc::new(TracingSink), debug)
    }

    /// Logger that never writes.
    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink), false)
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Returns a copy with the debug switch set.
    pub fn with_debug(&self, debug: bool) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            debug,
        }
    }

    /// Writes a line if debug output is enabled.
    pub fn log(&self, message: impl fmt::Display) {
        if self.debug {
            self.sink.log(&message.to_string());
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing(false)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}
