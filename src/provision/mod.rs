//! Ordered, fail-fast execution of provisioning steps.
//!
//! A [`ProvisioningPlan`] is built once per run and consumed by
//! [`ProvisioningOrchestrator::run`]. Steps execute strictly in order; the
//! first failure halts the run and is returned as a [`ProvisionError`].
//! Nothing done by earlier steps is rolled back, so every step should be safe
//! to re-run.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::{Instrument, error, info, info_span};

use crate::progress::ProgressSink;

mod error;

pub use error::{ProvisionError, StepError};

/// Future produced by a step action.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;

type StepAction<'a> = Box<dyn FnOnce() -> StepFuture<'a> + Send + 'a>;

/// One named unit of provisioning work.
pub struct ProvisioningStep<'a> {
    name: String,
    action: StepAction<'a>,
}

impl<'a> ProvisioningStep<'a> {
    /// Creates a step that runs `action` when the orchestrator reaches it.
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), StepError>> + Send + 'a,
    {
        Self {
            name: name.into(),
            action: Box::new(move || Box::pin(action()) as StepFuture<'a>),
        }
    }

    /// Human-readable step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ProvisioningStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningStep")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered sequence of steps for one provisioning run.
#[derive(Debug, Default)]
pub struct ProvisioningPlan<'a> {
    steps: Vec<ProvisioningStep<'a>>,
}

impl<'a> ProvisioningPlan<'a> {
    /// Creates an empty plan.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends `step` to the plan.
    #[must_use]
    pub fn with_step(mut self, step: ProvisioningStep<'a>) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a step built from `name` and `action`.
    #[must_use]
    pub fn step<F, Fut>(self, name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), StepError>> + Send + 'a,
    {
        self.with_step(ProvisioningStep::new(name, action))
    }

    /// Step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(ProvisioningStep::name).collect()
    }

    /// Number of steps in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Runs a plan's steps one after another.
pub struct ProvisioningOrchestrator<'a> {
    progress: &'a dyn ProgressSink,
}

impl<'a> ProvisioningOrchestrator<'a> {
    /// Creates an orchestrator that announces each step on `progress`.
    #[must_use]
    pub const fn new(progress: &'a dyn ProgressSink) -> Self {
        Self { progress }
    }

    /// Executes every step of `plan` in order.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] for the first step that fails. Later steps
    /// are not started and earlier steps are not undone.
    pub async fn run(&self, plan: ProvisioningPlan<'_>) -> Result<(), ProvisionError> {
        let total = plan.len();
        for (index, step) in plan.steps.into_iter().enumerate() {
            let position = index.saturating_add(1);
            let ProvisioningStep { name, action } = step;
            self.progress.notify(&format!("[{position}/{total}] {name}"));

            let span = info_span!("step", position, total, name = %name);
            let outcome = action().instrument(span).await;
            if let Err(source) = outcome {
                error!(position, total, step = %name, error = %source, "step failed");
                return Err(ProvisionError {
                    position,
                    total,
                    step: name,
                    source,
                });
            }
            info!(position, total, step = %name, "step finished");
        }
        Ok(())
    }
}
