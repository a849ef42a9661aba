//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `runctl.toml` (or the file named by
//! `RUNCTL_CONFIG_PATH`), and `RUNCTL_*` environment variables. Which fields
//! are required depends on the command, so validation is per command.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::operation::PollSettings;
use crate::retry::RetryPolicy;
use crate::service_usage::{self, normalise_service_ids};

/// Google APIs enabled on a new project unless configured otherwise.
pub const DEFAULT_GOOGLEAPIS: &str = "artifactregistry,cloudbuild,run";

/// Project, service, and timing settings for every `runctl` command.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "RUNCTL",
    discovery(
        app_name = "runctl",
        env_var = "RUNCTL_CONFIG_PATH",
        config_file_name = "runctl.toml",
        dotfile_name = ".runctl.toml",
        project_file_name = "runctl.toml"
    )
)]
pub struct ProvisionConfig {
    /// Google Cloud project identifier.
    pub project: Option<String>,
    /// Region for Cloud Run and Artifact Registry (for example `us-central1`).
    pub region: Option<String>,
    /// Cloud Run service name.
    pub service: Option<String>,
    /// Billing account linked to newly created projects.
    pub billing_account: Option<String>,
    /// Comma-separated Google APIs to enable, with or without the
    /// `.googleapis.com` suffix.
    #[ortho_config(default = DEFAULT_GOOGLEAPIS.to_owned())]
    pub googleapis: String,
    /// Path to the `gcloud` executable.
    #[ortho_config(default = "gcloud".to_owned())]
    pub gcloud_bin: String,
    /// Directory deployed with `gcloud run deploy --source`.
    #[ortho_config(default = ".".to_owned())]
    pub source: String,
    /// Artifact Registry repository created for container images.
    #[ortho_config(default = "docker-repo".to_owned())]
    pub repository: String,
    /// Milliseconds between status queries for long-running operations.
    #[ortho_config(default = 1000)]
    pub operation_poll_interval_ms: u64,
    /// Seconds before a pending operation is cancelled.
    #[ortho_config(default = 300)]
    pub operation_timeout_secs: u64,
    /// Seconds between attempts while newly enabled APIs settle.
    #[ortho_config(default = 5)]
    pub settle_delay_secs: u64,
    /// Seconds to keep retrying while newly enabled APIs settle.
    #[ortho_config(default = 120)]
    pub settle_timeout_secs: u64,
    /// Service Usage REST endpoint.
    #[ortho_config(default = service_usage::DEFAULT_ENDPOINT.to_owned())]
    pub service_usage_endpoint: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const PROJECT: FieldMetadata = FieldMetadata::new("Google Cloud project", "RUNCTL_PROJECT", "project");
const REGION: FieldMetadata = FieldMetadata::new("region", "RUNCTL_REGION", "region");
const SERVICE: FieldMetadata = FieldMetadata::new("Cloud Run service name", "RUNCTL_SERVICE", "service");
const BILLING_ACCOUNT: FieldMetadata = FieldMetadata::new(
    "billing account",
    "RUNCTL_BILLING_ACCOUNT",
    "billing_account",
);
const GOOGLEAPIS: FieldMetadata =
    FieldMetadata::new("Google APIs to enable", "RUNCTL_GOOGLEAPIS", "googleapis");
const GCLOUD_BIN: FieldMetadata =
    FieldMetadata::new("gcloud executable", "RUNCTL_GCLOUD_BIN", "gcloud_bin");
const REPOSITORY: FieldMetadata = FieldMetadata::new(
    "Artifact Registry repository",
    "RUNCTL_REPOSITORY",
    "repository",
);

impl ProvisionConfig {
    fn require_field<'a>(
        value: Option<&'a str>,
        metadata: &FieldMetadata,
    ) -> Result<&'a str, ConfigError> {
        match value.map(str::trim) {
            Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to runctl.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            ))),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("runctl")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Configured project.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no project is set.
    pub fn project(&self) -> Result<&str, ConfigError> {
        Self::require_field(self.project.as_deref(), &PROJECT)
    }

    /// Configured region.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no region is set.
    pub fn region(&self) -> Result<&str, ConfigError> {
        Self::require_field(self.region.as_deref(), &REGION)
    }

    /// Configured Cloud Run service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no service is set.
    pub fn service(&self) -> Result<&str, ConfigError> {
        Self::require_field(self.service.as_deref(), &SERVICE)
    }

    /// Configured billing account.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no billing account is set.
    pub fn billing_account(&self) -> Result<&str, ConfigError> {
        Self::require_field(self.billing_account.as_deref(), &BILLING_ACCOUNT)
    }

    /// Fully qualified ids of the APIs to enable, in configured order.
    #[must_use]
    pub fn service_ids(&self) -> Vec<String> {
        let names: Vec<&str> = self
            .googleapis
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        normalise_service_ids(&names)
    }

    /// Directory passed to `gcloud run deploy --source`.
    #[must_use]
    pub fn source_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.source.trim())
    }

    /// Polling cadence and budget for long-running operations.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.operation_poll_interval_ms),
            Duration::from_secs(self.operation_timeout_secs),
        )
    }

    /// Retry schedule used while newly enabled APIs become usable.
    #[must_use]
    pub const fn settle_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.settle_delay_secs),
            Duration::from_secs(self.settle_timeout_secs),
        )
    }

    fn validate_common(&self) -> Result<(), ConfigError> {
        Self::require_field(Some(self.gcloud_bin.as_str()), &GCLOUD_BIN)?;
        if self.operation_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "operation_poll_interval_ms must be greater than zero (RUNCTL_OPERATION_POLL_INTERVAL_MS)",
            )));
        }
        Ok(())
    }

    /// Checks the fields `runctl create` needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value,
    /// or [`ConfigError::InvalidValue`] when no APIs are configured.
    pub fn validate_for_create(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        self.project()?;
        self.region()?;
        self.billing_account()?;
        Self::require_field(Some(self.repository.as_str()), &REPOSITORY)?;
        if self.service_ids().is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "no {} configured: set {} or add {} to runctl.toml",
                GOOGLEAPIS.description, GOOGLEAPIS.env_var, GOOGLEAPIS.toml_key
            )));
        }
        Ok(())
    }

    /// Checks the fields `runctl deploy` needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate_for_deploy(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        self.project()?;
        self.region()?;
        self.service()?;
        Ok(())
    }

    /// Checks the fields `runctl remove` needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no project is set.
    pub fn validate_for_remove(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        self.project()?;
        Ok(())
    }

    /// Checks the fields `runctl logs` needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first missing value.
    pub fn validate_for_logs(&self) -> Result<(), ConfigError> {
        self.project()?;
        self.region()?;
        self.service()?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
