//! Binary entry point for the runctl CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::Level;

use runctl::clock::TokioClock;
use runctl::config::{ConfigError, ProvisionConfig};
use runctl::logging::{LoggingError, init_logging};
use runctl::operation::RemoteError;
use runctl::process::ProcessRunner;
use runctl::progress::{ProgressSink, StderrProgress};
use runctl::provision::{ProvisionError, ProvisioningOrchestrator};
use runctl::service_usage::ServiceUsageClient;
use runctl::workflow::{
    AccessTokenError, ProvisionContext, create_project_plan, deploy_plan, fetch_access_token,
    logs_url, remove_plan,
};

mod cli;

use cli::{Cli, Command, LogLevel};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    AccessToken(#[from] AccessTokenError),
    #[error("service usage client error: {0}")]
    ServiceUsage(#[from] RemoteError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    init_logging(cli.log_level.map(tracing_level))?;
    let config = ProvisionConfig::load_without_cli_args()?;
    dispatch(cli.command, &config, &StderrProgress).await
}

async fn dispatch(
    command: Command,
    config: &ProvisionConfig,
    progress: &dyn ProgressSink,
) -> Result<(), CliError> {
    let runner = ProcessRunner::system();
    let clock = TokioClock;
    let ctx = ProvisionContext::new(config, &runner, &clock, progress);
    let orchestrator = ProvisioningOrchestrator::new(progress);

    match command {
        Command::Create => {
            config.validate_for_create()?;
            let token = fetch_access_token(&runner, config).await?;
            let operations =
                ServiceUsageClient::new(config.service_usage_endpoint.as_str(), token)?;
            orchestrator
                .run(create_project_plan(&ctx, &operations)?)
                .await?;
            progress.notify("done");
        }
        Command::Deploy => orchestrator.run(deploy_plan(&ctx)?).await?,
        Command::Remove => orchestrator.run(remove_plan(&ctx)?).await?,
        Command::Logs => {
            let url = logs_url(config)?;
            writeln!(io::stdout(), "{url}").ok();
        }
    }
    Ok(())
}

const fn tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use runctl::test_support::RecordingProgress;

    use super::*;

    fn config() -> ProvisionConfig {
        ProvisionConfig {
            project: Some(String::from("demo-123")),
            region: Some(String::from("us-central1")),
            service: None,
            billing_account: None,
            googleapis: String::from(runctl::config::DEFAULT_GOOGLEAPIS),
            gcloud_bin: String::from("definitely-not-gcloud-xyz"),
            source: String::from("."),
            repository: String::from("docker-repo"),
            operation_poll_interval_ms: 1000,
            operation_timeout_secs: 300,
            settle_delay_secs: 5,
            settle_timeout_secs: 120,
            service_usage_endpoint: String::from(runctl::service_usage::DEFAULT_ENDPOINT),
        }
    }

    #[tokio::test]
    async fn create_validates_before_touching_gcloud() {
        let progress = RecordingProgress::new();

        let err = dispatch(Command::Create, &config(), &progress)
            .await
            .expect_err("billing account is missing");

        assert!(matches!(err, CliError::Config(ConfigError::MissingField(_))));
        assert!(progress.lines().is_empty());
    }

    #[tokio::test]
    async fn remove_reports_the_failing_step() {
        let progress = RecordingProgress::new();

        let err = dispatch(Command::Remove, &config(), &progress)
            .await
            .expect_err("gcloud binary does not exist");

        assert!(
            err.to_string()
                .starts_with("step 1/1 (delete project) failed: failed to spawn definitely-not-gcloud-xyz"),
            "unexpected error: {err}"
        );
        assert_eq!(progress.lines(), vec![String::from("[1/1] delete project")]);
    }

    #[tokio::test]
    async fn logs_requires_service() {
        let err = dispatch(Command::Logs, &config(), &RecordingProgress::new())
            .await
            .expect_err("service is missing");

        assert!(err.to_string().contains("RUNCTL_SERVICE"), "unexpected error: {err}");
    }

    #[test]
    fn log_levels_map_to_tracing_levels() {
        assert_eq!(tracing_level(LogLevel::Warn), Level::WARN);
        assert_eq!(tracing_level(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(ConfigError::MissingField(String::from(
            "missing region: set RUNCTL_REGION or add region to runctl.toml",
        )));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");

        assert_eq!(
            rendered,
            "configuration error: missing configuration field: missing region: set RUNCTL_REGION or add region to runctl.toml\n"
        );
    }
}
