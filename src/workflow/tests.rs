//! Tests for the concrete provisioning plans, driven by scripted
//! collaborators.

use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::operation::Operation;
use crate::process::ProcessResult;
use crate::provision::ProvisioningOrchestrator;
use crate::test_support::{
    ManualClock, RecordingProgress, ScriptedOperationClient, ScriptedTarget,
};

const OPERATION: &str = "operations/acat.p2-42";

#[fixture]
fn config() -> ProvisionConfig {
    ProvisionConfig {
        project: Some(String::from("demo-123")),
        region: Some(String::from("europe-west1")),
        service: Some(String::from("api")),
        billing_account: Some(String::from("0X0X0X-0X0X0X-0X0X0X")),
        googleapis: String::from(crate::config::DEFAULT_GOOGLEAPIS),
        gcloud_bin: String::from("gcloud"),
        source: String::from("."),
        repository: String::from("docker-repo"),
        operation_poll_interval_ms: 1000,
        operation_timeout_secs: 300,
        settle_delay_secs: 5,
        settle_timeout_secs: 120,
        service_usage_endpoint: String::from(crate::service_usage::DEFAULT_ENDPOINT),
    }
}

struct World {
    target: ScriptedTarget,
    runner: ProcessRunner<ScriptedTarget>,
    operations: ScriptedOperationClient,
    clock: ManualClock,
    progress: RecordingProgress,
}

impl World {
    fn new() -> Self {
        let target = ScriptedTarget::new();
        Self {
            runner: ProcessRunner::new(target.clone()),
            target,
            operations: ScriptedOperationClient::new(),
            clock: ManualClock::new(),
            progress: RecordingProgress::new(),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.target
            .invocations()
            .iter()
            .map(crate::test_support::CommandInvocation::command_string)
            .collect()
    }

    async fn create(&self, config: &ProvisionConfig) -> Result<(), crate::provision::ProvisionError> {
        let ctx = ProvisionContext::new(config, &self.runner, &self.clock, &self.progress);
        let plan = create_project_plan(&ctx, &self.operations).expect("plan builds");
        ProvisioningOrchestrator::new(&self.progress).run(plan).await
    }

    fn enabled_response(&self) {
        self.operations
            .push_submit(Ok(Operation::pending(OPERATION)));
        self.operations.push_status(Ok(Operation::succeeded(
            OPERATION,
            json!({"services": [
                {"name": "projects/1/services/run.googleapis.com"},
                {"name": "projects/1/services/cloudbuild.googleapis.com"},
                {"name": "projects/1/services/artifactregistry.googleapis.com"},
            ]}),
        )));
    }
}

#[fixture]
fn world() -> World {
    World::new()
}

fn strings(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| (*line).to_owned()).collect()
}

#[rstest]
#[tokio::test]
async fn create_runs_every_step_in_order(world: World, config: ProvisionConfig) {
    for _ in 0..3 {
        world.target.push_success();
    }
    world
        .operations
        .push_submit(Ok(Operation::pending(OPERATION)));
    world.operations.push_status(Ok(Operation::pending(OPERATION)));
    world.operations.push_status(Ok(Operation::succeeded(
        OPERATION,
        json!({"services": [
            {"name": "projects/1/services/run.googleapis.com"},
            {"name": "projects/1/services/cloudbuild.googleapis.com"},
            {"name": "projects/1/services/artifactregistry.googleapis.com"},
        ]}),
    )));

    world.create(&config).await.expect("create succeeds");

    assert_eq!(
        world.commands(),
        strings(&[
            "gcloud projects create demo-123 --quiet",
            "gcloud beta billing projects link demo-123 --billing-account 0X0X0X-0X0X0X-0X0X0X --quiet",
            "gcloud --project=demo-123 artifacts repositories create docker-repo --location=europe-west1 --repository-format=docker --quiet",
        ])
    );
    let submitted = world.operations.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted.first().map(|r| r.parent.as_str()), Some("projects/demo-123"));
    assert_eq!(
        submitted.first().map(|r| r.ids.clone()),
        Some(strings(&[
            "artifactregistry.googleapis.com",
            "cloudbuild.googleapis.com",
            "run.googleapis.com",
        ]))
    );
    assert_eq!(world.clock.sleeps(), vec![Duration::from_secs(1)]);
    assert_eq!(
        world.progress.lines(),
        strings(&[
            "[1/4] create project",
            "[2/4] link billing",
            "[3/4] enable services",
            "checking operation status...",
            "checking operation status...",
            "done",
            "- artifactregistry",
            "- cloudbuild",
            "- run",
            "[4/4] create artifact repository",
        ])
    );
}

#[rstest]
#[tokio::test]
async fn repository_creation_waits_for_services_to_settle(world: World, config: ProvisionConfig) {
    world.target.push_success();
    world.target.push_success();
    world.target.push_exit_code(1, "API [artifactregistry] not enabled");
    world.target.push_exit_code(1, "API [artifactregistry] not enabled");
    world.target.push_success();
    world.enabled_response();

    world.create(&config).await.expect("create succeeds");

    assert_eq!(world.target.invocations().len(), 5);
    assert_eq!(
        world.clock.sleeps(),
        vec![Duration::from_secs(5), Duration::from_secs(5)]
    );
    let waits = world
        .progress
        .lines()
        .into_iter()
        .filter(|line| line == "waiting for services to settle...")
        .count();
    assert_eq!(waits, 2);
}

#[rstest]
#[tokio::test]
async fn repository_retries_stop_at_the_settle_budget(world: World, mut config: ProvisionConfig) {
    config.settle_timeout_secs = 10;
    world.target.push_success();
    world.target.push_success();
    for _ in 0..5 {
        world.target.push_exit_code(1, "API not enabled");
    }
    world.enabled_response();

    let err = world.create(&config).await.expect_err("repository never settles");

    assert_eq!(err.position, 4);
    assert_eq!(err.step, "create artifact repository");
    let StepError::RetryExhausted { attempts, .. } = err.source else {
        panic!("expected RetryExhausted, got {:?}", err.source);
    };
    assert_eq!(attempts, 4, "attempts at 0s, 5s, 10s, and 15s");
    assert_eq!(world.target.invocations().len(), 6);
    assert_eq!(world.clock.sleeps(), vec![Duration::from_secs(5); 3]);
}

#[rstest]
#[tokio::test]
async fn missing_gcloud_fails_the_first_step(world: World, config: ProvisionConfig) {
    world
        .target
        .push_spawn_failure("No such file or directory (os error 2)");

    let err = world.create(&config).await.expect_err("gcloud cannot start");

    assert_eq!(
        err.to_string(),
        "step 1/4 (create project) failed: failed to spawn gcloud: No such file or directory (os error 2)"
    );
    assert!(matches!(
        err.source,
        StepError::Process(ProcessError::Spawn { .. })
    ));
    assert_eq!(world.target.invocations().len(), 1);
    assert!(world.operations.submitted().is_empty());
}

#[rstest]
#[tokio::test]
async fn billing_failure_halts_before_enabling_services(world: World, config: ProvisionConfig) {
    world.target.push_success();
    world.target.push_exit_code(1, "ERROR: billing account not found");

    let err = world.create(&config).await.expect_err("billing link fails");

    assert_eq!(err.position, 2);
    assert_eq!(
        err.to_string(),
        "step 2/4 (link billing) failed: gcloud failed with exit code 1: ERROR: billing account not found"
    );
    assert_eq!(world.target.invocations().len(), 2);
    assert!(world.operations.submitted().is_empty());
}

#[rstest]
#[tokio::test]
async fn enabling_services_times_out_and_cancels(world: World, mut config: ProvisionConfig) {
    config.operation_timeout_secs = 3;
    world.target.push_success();
    world.target.push_success();
    world
        .operations
        .push_submit(Ok(Operation::pending(OPERATION)));

    let err = world.create(&config).await.expect_err("operation never finishes");

    assert_eq!(err.position, 3);
    assert!(matches!(
        err.source,
        StepError::Operation(OperationError::Timeout { .. })
    ));
    assert_eq!(world.operations.cancelled(), strings(&[OPERATION]));
    assert_eq!(world.target.invocations().len(), 2);
}

#[rstest]
#[tokio::test]
async fn rejected_batch_request_fails_the_step(world: World, config: ProvisionConfig) {
    world.target.push_success();
    world.target.push_success();
    world
        .operations
        .push_submit(Err(crate::operation::RemoteError::new("HTTP 403: Permission denied.")));

    let err = world.create(&config).await.expect_err("submit fails");

    assert_eq!(
        err.to_string(),
        "step 3/4 (enable services) failed: failed to start operation: HTTP 403: Permission denied."
    );
    assert_eq!(world.operations.checks(), 0);
}

#[rstest]
fn create_requires_billing_account(world: World, mut config: ProvisionConfig) {
    config.billing_account = None;
    let ctx = ProvisionContext::new(&config, &world.runner, &world.clock, &world.progress);

    let Err(err) = create_project_plan(&ctx, &world.operations) else {
        panic!("billing account is required");
    };

    assert!(
        err.to_string().contains("RUNCTL_BILLING_ACCOUNT"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn deploy_forwards_gcloud_progress(world: World, config: ProvisionConfig) {
    world.target.push_output(
        ProcessResult::exited(0),
        "",
        "Building using Buildpacks...\n\nService [api] revision [api-00001] has been deployed\n",
    );
    let ctx = ProvisionContext::new(&config, &world.runner, &world.clock, &world.progress);
    let plan = deploy_plan(&ctx).expect("plan builds");

    ProvisioningOrchestrator::new(&world.progress)
        .run(plan)
        .await
        .expect("deploy succeeds");

    assert_eq!(
        world.commands(),
        strings(&[
            "gcloud --project demo-123 run deploy api --source=. --allow-unauthenticated --region=europe-west1 --quiet",
        ])
    );
    assert_eq!(
        world.progress.lines(),
        strings(&[
            "[1/1] deploy service",
            "Building using Buildpacks...",
            "Service [api] revision [api-00001] has been deployed",
        ])
    );
}

#[rstest]
fn deploy_requires_service(world: World, mut config: ProvisionConfig) {
    config.service = Some(String::from("  "));
    let ctx = ProvisionContext::new(&config, &world.runner, &world.clock, &world.progress);

    let Err(err) = deploy_plan(&ctx) else {
        panic!("service is required");
    };

    assert!(matches!(err, ConfigError::MissingField(_)));
}

#[rstest]
#[tokio::test]
async fn remove_deletes_the_project(world: World, config: ProvisionConfig) {
    world.target.push_success();
    let ctx = ProvisionContext::new(&config, &world.runner, &world.clock, &world.progress);
    let plan = remove_plan(&ctx).expect("plan builds");

    ProvisioningOrchestrator::new(&world.progress)
        .run(plan)
        .await
        .expect("remove succeeds");

    assert_eq!(
        world.commands(),
        strings(&["gcloud --project=demo-123 projects delete demo-123 --quiet"])
    );
}

#[rstest]
#[tokio::test]
async fn remove_surfaces_signal_termination(world: World, config: ProvisionConfig) {
    world.target.push_signal(15);
    let ctx = ProvisionContext::new(&config, &world.runner, &world.clock, &world.progress);
    let plan = remove_plan(&ctx).expect("plan builds");

    let err = ProvisioningOrchestrator::new(&world.progress)
        .run(plan)
        .await
        .expect_err("signalled gcloud fails");

    assert_eq!(
        err.to_string(),
        "step 1/1 (delete project) failed: gcloud failed with signal 15"
    );
}

#[rstest]
fn logs_url_points_at_cloud_console(config: ProvisionConfig) {
    assert_eq!(
        logs_url(&config).expect("url"),
        "https://console.cloud.google.com/run/detail/europe-west1/api/logs?project=demo-123"
    );
}

#[rstest]
fn logs_url_requires_region(mut config: ProvisionConfig) {
    config.region = None;

    let err = logs_url(&config).expect_err("region is required");

    assert!(err.to_string().contains("RUNCTL_REGION"), "unexpected error: {err}");
}

#[rstest]
#[tokio::test]
async fn access_token_is_trimmed(world: World, config: ProvisionConfig) {
    world
        .target
        .push_output(ProcessResult::exited(0), "ya29.token\n", "");

    let token = fetch_access_token(&world.runner, &config)
        .await
        .expect("token");

    assert_eq!(token, "ya29.token");
    assert_eq!(world.commands(), strings(&["gcloud auth print-access-token"]));
}

#[rstest]
#[tokio::test]
async fn empty_access_token_is_rejected(world: World, config: ProvisionConfig) {
    world.target.push_output(ProcessResult::exited(0), "\n", "");

    let err = fetch_access_token(&world.runner, &config)
        .await
        .expect_err("empty token");

    assert_eq!(
        err,
        AccessTokenError::Empty {
            program: String::from("gcloud"),
        }
    );
}
