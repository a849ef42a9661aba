//! Command-line interface definitions for the `runctl` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `runctl` binary.
#[derive(Debug, Parser)]
#[command(
    name = "runctl",
    version,
    about = "Provision a Google Cloud project and deploy a Cloud Run service with gcloud",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log verbosity; overrides RUNCTL_LOG.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub(crate) log_level: Option<LogLevel>,
    /// Command to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `runctl`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create the project, link billing, enable APIs, and create the
    /// container repository.
    #[command(name = "create")]
    Create,
    /// Build and deploy the source directory to Cloud Run.
    #[command(name = "deploy")]
    Deploy,
    /// Delete the project and everything in it.
    #[command(name = "remove")]
    Remove,
    /// Print the Cloud Console URL for the service's logs.
    #[command(name = "logs")]
    Logs,
}

/// Accepted values for `--log-level`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Progress of each step.
    Info,
    /// Every spawned command and status query.
    Debug,
    /// Everything.
    Trace,
}
