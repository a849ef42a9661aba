//! Error taxonomy for provisioning steps and runs.

use thiserror::Error;

use crate::operation::OperationError;
use crate::process::ProcessError;
use crate::retry::RetryExhausted;

/// Failure of a single provisioning step.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StepError {
    /// An external command could not be launched or did not succeed.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// A remote long-running operation timed out, failed, or could not be
    /// queried.
    #[error(transparent)]
    Operation(#[from] OperationError),
    /// A retried action kept failing until its budget ran out.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Number of times the action ran.
        attempts: u32,
        /// Failure from the final attempt.
        #[source]
        last_error: Box<StepError>,
    },
}

impl From<RetryExhausted<Self>> for StepError {
    fn from(value: RetryExhausted<Self>) -> Self {
        Self::RetryExhausted {
            attempts: value.attempts,
            last_error: Box::new(value.last_error),
        }
    }
}

/// The step that halted a provisioning run, with its position in the plan.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("step {position}/{total} ({step}) failed: {source}")]
pub struct ProvisionError {
    /// One-based index of the failing step.
    pub position: usize,
    /// Number of steps in the plan.
    pub total: usize,
    /// Name of the failing step.
    pub step: String,
    /// Underlying failure.
    #[source]
    pub source: StepError,
}
