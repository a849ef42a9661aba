//! Concrete provisioning plans for the `runctl` commands.
//!
//! Each builder validates the configuration it needs up front, then returns a
//! [`ProvisioningPlan`] whose steps borrow the shared [`ProvisionContext`].

use thiserror::Error;
use tracing::info;

use crate::clock::Clock;
use crate::config::{ConfigError, ProvisionConfig};
use crate::gcloud::Gcloud;
use crate::operation::{BatchRequest, OperationClient, OperationError, OperationPoller};
use crate::process::{ExecutionTarget, ProcessError, ProcessRunner};
use crate::progress::ProgressSink;
use crate::provision::{ProvisioningPlan, StepError};
use crate::retry::RetryScheduler;
use crate::service_usage::enabled_service_names;

/// Collaborators shared by every step of a run.
pub struct ProvisionContext<'a, T, K: ?Sized> {
    /// Validated configuration.
    pub config: &'a ProvisionConfig,
    /// Runner used for every `gcloud` invocation.
    pub runner: &'a ProcessRunner<T>,
    /// Clock for polling and retry delays.
    pub clock: &'a K,
    /// Sink for user-facing progress lines.
    pub progress: &'a dyn ProgressSink,
}

impl<'a, T, K> ProvisionContext<'a, T, K>
where
    T: ExecutionTarget,
    K: Clock + ?Sized,
{
    /// Bundles the collaborators for one run.
    #[must_use]
    pub const fn new(
        config: &'a ProvisionConfig,
        runner: &'a ProcessRunner<T>,
        clock: &'a K,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            runner,
            clock,
            progress,
        }
    }

    fn gcloud(&self) -> Gcloud {
        Gcloud::new(self.config.gcloud_bin.as_str())
    }
}

/// Builds the plan for `runctl create`: create the project, link billing,
/// enable the configured APIs, then create the container repository once the
/// APIs have settled.
///
/// # Errors
///
/// Returns [`ConfigError`] when a value the plan needs is missing.
pub fn create_project_plan<'a, T, K, C>(
    ctx: &'a ProvisionContext<'a, T, K>,
    operations: &'a C,
) -> Result<ProvisioningPlan<'a>, ConfigError>
where
    T: ExecutionTarget,
    K: Clock + ?Sized,
    C: OperationClient + ?Sized,
{
    ctx.config.validate_for_create()?;
    let project = ctx.config.project()?;
    let region = ctx.config.region()?;
    let billing_account = ctx.config.billing_account()?;
    let gcloud = ctx.gcloud();

    let create = gcloud.create_project(project);
    let link = gcloud.link_billing(project, billing_account);
    let repository =
        gcloud.create_docker_repository(project, ctx.config.repository.trim(), region);
    let request = BatchRequest {
        parent: format!("projects/{project}"),
        ids: ctx.config.service_ids(),
    };
    let settings = ctx.config.poll_settings();
    let policy = ctx.config.settle_policy();
    let runner = ctx.runner;
    let clock = ctx.clock;
    let progress = ctx.progress;

    Ok(ProvisioningPlan::new()
        .step("create project", move || async move {
            runner.output(&create).await?;
            Ok(())
        })
        .step("link billing", move || async move {
            runner.output(&link).await?;
            Ok(())
        })
        .step("enable services", move || async move {
            let operation = operations
                .submit(&request)
                .await
                .map_err(OperationError::Submit)?;
            info!(operation = %operation.name, "batch enable submitted");
            let response = OperationPoller::new(operations, clock, progress)
                .poll(&operation, settings)
                .await?;
            for name in enabled_service_names(&response) {
                progress.notify(&format!("- {name}"));
            }
            Ok(())
        })
        .step("create artifact repository", move || async move {
            let command = &repository;
            RetryScheduler::new(clock, progress)
                .retry_until(policy, move || async move {
                    runner
                        .output(command)
                        .await
                        .map(|_| ())
                        .map_err(StepError::from)
                })
                .await?;
            Ok(())
        }))
}

/// Builds the plan for `runctl deploy`: build and deploy the source directory
/// to Cloud Run. `gcloud`'s own progress output is forwarded line by line.
///
/// # Errors
///
/// Returns [`ConfigError`] when a value the plan needs is missing.
pub fn deploy_plan<'a, T, K>(
    ctx: &'a ProvisionContext<'a, T, K>,
) -> Result<ProvisioningPlan<'a>, ConfigError>
where
    T: ExecutionTarget,
    K: Clock + ?Sized,
{
    ctx.config.validate_for_deploy()?;
    let deploy = ctx.gcloud().deploy(
        ctx.config.project()?,
        ctx.config.service()?,
        ctx.config.region()?,
        &ctx.config.source_dir(),
    );
    let runner = ctx.runner;
    let progress = ctx.progress;

    Ok(ProvisioningPlan::new().step("deploy service", move || async move {
        let output = runner.output(&deploy).await?;
        forward_lines(progress, &output.stderr);
        Ok(())
    }))
}

/// Builds the plan for `runctl remove`: delete the project.
///
/// # Errors
///
/// Returns [`ConfigError`] when no project is configured.
pub fn remove_plan<'a, T, K>(
    ctx: &'a ProvisionContext<'a, T, K>,
) -> Result<ProvisioningPlan<'a>, ConfigError>
where
    T: ExecutionTarget,
    K: Clock + ?Sized,
{
    ctx.config.validate_for_remove()?;
    let delete = ctx.gcloud().delete_project(ctx.config.project()?);
    let runner = ctx.runner;

    Ok(ProvisioningPlan::new().step("delete project", move || async move {
        runner.output(&delete).await?;
        Ok(())
    }))
}

/// Cloud Console URL for the deployed service's logs.
///
/// # Errors
///
/// Returns [`ConfigError`] when the project, region, or service is missing.
pub fn logs_url(config: &ProvisionConfig) -> Result<String, ConfigError> {
    config.validate_for_logs()?;
    Ok(format!(
        "https://console.cloud.google.com/run/detail/{}/{}/logs?project={}",
        config.region()?,
        config.service()?,
        config.project()?
    ))
}

/// Errors raised while borrowing an access token from `gcloud`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AccessTokenError {
    /// `gcloud auth print-access-token` did not succeed.
    #[error("failed to obtain an access token: {0}")]
    Process(#[from] ProcessError),
    /// `gcloud` succeeded but printed nothing.
    #[error("{program} printed an empty access token; run `gcloud auth login`")]
    Empty {
        /// Executable that was run.
        program: String,
    },
}

/// Borrows an OAuth access token from the active `gcloud` account.
///
/// # Errors
///
/// Returns [`AccessTokenError`] when `gcloud` fails or prints no token.
pub async fn fetch_access_token<T: ExecutionTarget>(
    runner: &ProcessRunner<T>,
    config: &ProvisionConfig,
) -> Result<String, AccessTokenError> {
    let command = Gcloud::new(config.gcloud_bin.as_str()).print_access_token();
    let output = runner.output(&command).await?;
    let token = output.stdout.trim();
    if token.is_empty() {
        return Err(AccessTokenError::Empty {
            program: command.program().to_owned(),
        });
    }
    Ok(token.to_owned())
}

fn forward_lines(progress: &dyn ProgressSink, text: &str) {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .for_each(|line| progress.notify(line));
}

#[cfg(test)]
mod tests;
