//! Core library for the runctl provisioning tool.
//!
//! The crate drives multi-step provisioning of a Cloud Run service: it spawns
//! `gcloud` commands and collects their output, polls remote long-running
//! operations with a bounded timeout, retries eventually-consistent calls on a
//! fixed schedule, and runs the steps of a plan in order, stopping at the
//! first failure.

pub mod clock;
pub mod config;
pub mod gcloud;
pub mod logging;
pub mod operation;
pub mod process;
pub mod progress;
pub mod provision;
pub mod retry;
pub mod service_usage;
pub mod test_support;
pub mod workflow;

pub use clock::{Clock, TokioClock};
pub use config::{ConfigError, ProvisionConfig};
pub use operation::{
    BatchRequest, Operation, OperationClient, OperationError, OperationOutcome, OperationPoller,
    PollSettings, RemoteError,
};
pub use process::{
    CommandOutput, ExecutionTarget, ExternalCommand, ProcessError, ProcessHandle, ProcessResult,
    ProcessRunner, TokioExecutionTarget,
};
pub use progress::{ProgressSink, SilentProgress, StderrProgress};
pub use provision::{
    ProvisionError, ProvisioningOrchestrator, ProvisioningPlan, ProvisioningStep, StepError,
};
pub use retry::{RetryExhausted, RetryPolicy, RetryScheduler};
