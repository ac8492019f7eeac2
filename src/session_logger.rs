//! Logging trait for chat session activity.
//!
//! This module provides the [`SessionLogger`] trait that lets callers observe everything a
//! [`ChatSession`](crate::ChatSession) sees on the wire and every condition it recovers from
//! silently.

use std::io::{self, Write};

use crate::{AgentEvent, Error};

/// A trait for logging chat session activity.
///
/// # Example
///
/// ```rust
/// use std::sync::Mutex;
///
/// use compass_chat::{AgentEvent, Error, SessionLogger};
///
/// #[derive(Default)]
/// struct Recorder {
///     events: Mutex<Vec<String>>,
/// }
///
/// impl SessionLogger for Recorder {
///     fn log_stream_event(&self, event: &AgentEvent) {
///         self.events.lock().unwrap().push(event.name().to_string());
///     }
///
///     fn log_skipped_frame(&self, _: &Error) {}
///
///     fn log_progress(&self, _: &str) {}
///
///     fn log_store_failure(&self, _: &str, _: &Error) {}
///
///     fn log_error(&self, _: &Error) {}
/// }
/// ```
pub trait SessionLogger: Send + Sync {
    /// Log an event decoded from the agent stream, before it is applied.
    fn log_stream_event(&self, event: &AgentEvent);

    /// Log a malformed frame that was skipped.
    fn log_skipped_frame(&self, error: &Error);

    /// Log a progress message sent by a tool.
    fn log_progress(&self, message: &str);

    /// Log a failure to read or write the key-value store.
    fn log_store_failure(&self, key: &str, error: &Error);

    /// Log an error reported for the current turn.
    fn log_error(&self, error: &Error);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl SessionLogger for NoopLogger {
    fn log_stream_event(&self, _: &AgentEvent) {}

    fn log_skipped_frame(&self, _: &Error) {}

    fn log_progress(&self, _: &str) {}

    fn log_store_failure(&self, _: &str, _: &Error) {}

    fn log_error(&self, _: &Error) {}
}

/// Writes warnings to standard error.
///
/// Stream events are only written when `verbose` is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrLogger {
    verbose: bool,
}

impl StderrLogger {
    /// A logger that writes warnings only.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// A logger that also writes every stream event.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn write_line(&self, line: std::fmt::Arguments<'_>) {
        let mut stderr = io::stderr().lock();
        _ = writeln!(stderr, "{line}");
    }
}

impl SessionLogger for StderrLogger {
    fn log_stream_event(&self, event: &AgentEvent) {
        if self.verbose {
            match serde_json::to_string(event) {
                Ok(json) => self.write_line(format_args!("event: {json}")),
                Err(_) => self.write_line(format_args!("event: {}", event.name())),
            }
        }
    }

    fn log_skipped_frame(&self, error: &Error) {
        self.write_line(format_args!("warning: skipped SSE frame: {error}"));
    }

    fn log_progress(&self, message: &str) {
        if self.verbose {
            self.write_line(format_args!("progress: {message}"));
        }
    }

    fn log_store_failure(&self, key: &str, error: &Error) {
        self.write_line(format_args!("warning: could not persist {key}: {error}"));
    }

    fn log_error(&self, error: &Error) {
        self.write_line(format_args!("error: {error}"));
    }
}
