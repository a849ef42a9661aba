//! User-facing progress lines for long waits.
//!
//! Progress is a separate channel from logging: log records are filtered by
//! level and meant for diagnosis, while progress lines tell an interactive
//! user that a slow step is still alive.

use std::io::{self, Write};

/// Receives one line of progress text at a time.
pub trait ProgressSink: Send + Sync {
    /// Surfaces `message` to the user.
    fn notify(&self, message: &str);
}

/// Writes progress lines to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn notify(&self, message: &str) {
        writeln!(io::stderr(), "{message}").ok();
    }
}

/// Discards every progress line.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn notify(&self, _message: &str) {}
}
