//! Remote long-running operations.
//!
//! A remote API that cannot answer synchronously returns an [`Operation`]
//! naming the work it started. The [`OperationClient`] trait is the seam to
//! that API (submit, check progress, cancel); [`OperationPoller`] drives an
//! operation to completion against it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

mod poller;

pub use poller::{OperationPoller, PollSettings};

/// Future returned by [`OperationClient`] calls.
pub type OperationFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Snapshot of a remote long-running operation.
///
/// Only the remote service changes an operation; the poller reads snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    /// Server-assigned operation name used for follow-up calls.
    pub name: String,
    /// Whether the remote work has finished.
    pub done: bool,
    /// Service-specific progress metadata.
    pub metadata: Option<Value>,
    /// Final outcome, present once `done` is true.
    pub result: Option<OperationOutcome>,
}

impl Operation {
    /// Snapshot of an operation that is still running.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            metadata: None,
            result: None,
        }
    }

    /// Snapshot of an operation that finished with `response`.
    #[must_use]
    pub fn succeeded(name: impl Into<String>, response: Value) -> Self {
        Self {
            name: name.into(),
            done: true,
            metadata: None,
            result: Some(OperationOutcome::Response(response)),
        }
    }

    /// Snapshot of an operation that finished with an error status.
    #[must_use]
    pub fn failed(name: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
            metadata: None,
            result: Some(OperationOutcome::Error {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Final outcome of a finished operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationOutcome {
    /// The operation produced a response payload.
    Response(Value),
    /// The operation finished with an error status.
    Error {
        /// Status code reported by the service.
        code: i32,
        /// Human-readable status message.
        message: String,
    },
}

/// Batch request submitted to start a long-running operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchRequest {
    /// Resource the batch applies to (for example `projects/my-project`).
    pub parent: String,
    /// Identifiers the batch acts on.
    pub ids: Vec<String>,
}

/// Failure reported by the remote API itself (transport, HTTP, decoding).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct RemoteError {
    /// Human-readable description of the failure.
    pub message: String,
}

impl RemoteError {
    /// Creates an error carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Remote API that starts and tracks long-running operations.
pub trait OperationClient: Send + Sync {
    /// Submits `request` and returns the operation it started.
    fn submit<'a>(&'a self, request: &'a BatchRequest) -> OperationFuture<'a, Operation>;

    /// Fetches the current snapshot of the operation called `name`.
    fn check_progress<'a>(&'a self, name: &'a str) -> OperationFuture<'a, Operation>;

    /// Asks the remote API to cancel `operation`.
    fn cancel<'a>(&'a self, operation: &'a Operation) -> OperationFuture<'a, ()>;
}

fn format_budget(budget: &Duration) -> String {
    if budget.subsec_nanos() == 0 {
        format!("{}s", budget.as_secs())
    } else {
        format!("{budget:?}")
    }
}

/// Errors surfaced while starting or tracking an operation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum OperationError {
    /// Raised when the batch request is rejected before an operation exists.
    #[error("failed to start operation: {0}")]
    Submit(#[source] RemoteError),
    /// Raised when a status query fails; the operation may still be running.
    #[error("status query for operation {name} failed: {source}")]
    Query {
        /// Operation being tracked.
        name: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when the operation is still pending after the timeout. The
    /// operation has been cancelled before this is returned.
    #[error("operation timed out after {} ({name})", format_budget(.timeout))]
    Timeout {
        /// Operation that was cancelled.
        name: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// Raised when the operation finished with an error status.
    #[error("operation {name} failed with code {code}: {message}")]
    Failed {
        /// Operation that failed.
        name: String,
        /// Status code reported by the service.
        code: i32,
        /// Status message reported by the service.
        message: String,
    },
}
