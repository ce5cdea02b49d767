//! Diagnostics reported by the decoders.
//!
//! Decoders report recoverable problems (unknown record kinds, truncated entries, unresolvable
//! types) through a [`Logger`] that the caller passes in, so that a UI can attach the messages to
//! the functions and locals they concern.

use crate::Location;
use std::cell::RefCell;
use tracing::{debug, warn};

/// Receives diagnostic messages. Implementations must not panic.
pub trait Logger {
    /// Reports `message` about the bytes at `location`.
    fn log(&self, message: &str, location: &Location);
}

/// A message and the place it refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    #[allow(missing_docs)]
    pub message: String,
    #[allow(missing_docs)]
    pub location: Location,
}

/// Forwards messages to `tracing` at `WARN` level. This is the default logger.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str, location: &Location) {
        warn!("{message} ({location})");
    }
}

/// Discards messages.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _message: &str, _location: &Location) {}
}

/// Keeps every message it receives, and also forwards them to `tracing` at `DEBUG` level.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    entries: RefCell<Vec<LogEntry>>,
}

impl CapturingLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// The messages received so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Just the message text of each entry.
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    /// Removes and returns the messages received so far.
    pub fn take(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

impl Logger for CapturingLogger {
    fn log(&self, message: &str, location: &Location) {
        debug!("{message} ({location})");
        self.entries.borrow_mut().push(LogEntry {
            message: message.to_string(),
            location: *location,
        });
    }
}

/// Holds messages until [`DeferredLogger::flush`] is called.
///
/// The load scope gives each attempt its own `DeferredLogger` and flushes it only if the attempt
/// finishes, so that an attempt abandoned because of a fault reports nothing.
#[derive(Debug, Default)]
pub struct DeferredLogger {
    entries: RefCell<Vec<LogEntry>>,
}

impl DeferredLogger {
    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends everything held so far to `target`, in order.
    pub fn flush(&self, target: &dyn Logger) {
        for entry in self.entries.borrow_mut().drain(..) {
            target.log(&entry.message, &entry.location);
        }
    }
}

impl Logger for DeferredLogger {
    fn log(&self, message: &str, location: &Location) {
        self.entries.borrow_mut().push(LogEntry {
            message: message.to_string(),
            location: *location,
        });
    }
}
