//! Builders for the `gcloud` invocations each provisioning step needs.
//!
//! Every command is non-interactive (`--quiet`) so a run never blocks on a
//! prompt.

use camino::Utf8Path;

use crate::process::ExternalCommand;

/// Command factory bound to a specific `gcloud` executable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Gcloud {
    program: String,
}

impl Default for Gcloud {
    fn default() -> Self {
        Self::new("gcloud")
    }
}

impl Gcloud {
    /// Uses `program` as the `gcloud` executable.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> ExternalCommand {
        ExternalCommand::new(self.program.as_str())
    }

    /// `gcloud projects create <project> --quiet`
    #[must_use]
    pub fn create_project(&self, project: &str) -> ExternalCommand {
        self.command()
            .args(["projects", "create", project, "--quiet"])
    }

    /// `gcloud beta billing projects link <project> --billing-account <id> --quiet`
    #[must_use]
    pub fn link_billing(&self, project: &str, billing_account: &str) -> ExternalCommand {
        self.command().args([
            "beta",
            "billing",
            "projects",
            "link",
            project,
            "--billing-account",
            billing_account,
            "--quiet",
        ])
    }

    /// Creates a Docker-format Artifact Registry repository in `region`.
    #[must_use]
    pub fn create_docker_repository(
        &self,
        project: &str,
        repository: &str,
        region: &str,
    ) -> ExternalCommand {
        self.command()
            .arg(format!("--project={project}"))
            .args(["artifacts", "repositories", "create", repository])
            .arg(format!("--location={region}"))
            .args(["--repository-format=docker", "--quiet"])
    }

    /// Builds and deploys `source` to Cloud Run as `service`.
    #[must_use]
    pub fn deploy(
        &self,
        project: &str,
        service: &str,
        region: &str,
        source: &Utf8Path,
    ) -> ExternalCommand {
        self.command()
            .args(["--project", project, "run", "deploy", service])
            .arg(format!("--source={source}"))
            .arg("--allow-unauthenticated")
            .arg(format!("--region={region}"))
            .arg("--quiet")
    }

    /// `gcloud --project=<project> projects delete <project> --quiet`
    #[must_use]
    pub fn delete_project(&self, project: &str) -> ExternalCommand {
        self.command()
            .arg(format!("--project={project}"))
            .args(["projects", "delete", project, "--quiet"])
    }

    /// Prints an OAuth access token for the active account.
    #[must_use]
    pub fn print_access_token(&self) -> ExternalCommand {
        self.command().args(["auth", "print-access-token"])
    }
}
