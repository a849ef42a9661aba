//! End-to-end behaviour of provisioning plans built from the public API.

use std::sync::Mutex;
use std::time::Duration;

use rstest::{fixture, rstest};
use runctl::operation::{BatchRequest, Operation, OperationClient, OperationPoller, PollSettings};
use runctl::process::{ExternalCommand, ProcessError, ProcessRunner};
use runctl::provision::{ProvisioningOrchestrator, ProvisioningPlan, StepError};
use runctl::retry::{RetryPolicy, RetryScheduler};
use runctl::test_support::{ManualClock, RecordingProgress, ScriptedOperationClient};
use serde_json::json;
use tempfile::TempDir;

#[fixture]
fn workdir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

fn shell(script: &str) -> ExternalCommand {
    ExternalCommand::new("sh").args(["-c", script])
}

#[cfg(unix)]
#[rstest]
#[tokio::test]
async fn failing_step_leaves_earlier_effects_and_skips_later_steps(workdir: TempDir) {
    let runner = ProcessRunner::system();
    let progress = RecordingProgress::new();
    let marker = workdir.path().join("created");
    let later = Mutex::new(false);

    let create = shell(&format!("echo created > '{}'", marker.display()));
    let link = shell("echo 'billing account not found' >&2; exit 3");
    let (runner_ref, later_ref) = (&runner, &later);

    let plan = ProvisioningPlan::new()
        .step("create project", move || async move {
            runner_ref.output(&create).await?;
            Ok(())
        })
        .step("link billing", move || async move {
            runner_ref.output(&link).await?;
            Ok(())
        })
        .step("enable services", move || async move {
            *later_ref.lock().unwrap_or_else(|err| err.into_inner()) = true;
            Ok(())
        });

    let err = ProvisioningOrchestrator::new(&progress)
        .run(plan)
        .await
        .expect_err("second step fails");

    assert!(marker.exists(), "first step should have run");
    assert!(!*later.lock().unwrap_or_else(|err| err.into_inner()));
    assert_eq!(err.position, 2);
    assert_eq!(err.total, 3);
    assert_eq!(
        err.to_string(),
        "step 2/3 (link billing) failed: sh failed with exit code 3: billing account not found"
    );
    assert!(matches!(
        err.source,
        StepError::Process(ProcessError::Failure {
            exit_code: Some(3),
            ..
        })
    ));
    assert_eq!(progress.lines(), ["[1/3] create project", "[2/3] link billing"]);
}

#[tokio::test]
async fn polled_and_retried_steps_share_one_clock() {
    let clock = ManualClock::new();
    let progress = RecordingProgress::new();
    let operations = ScriptedOperationClient::new();
    operations.push_submit(Ok(Operation::pending("operations/enable-1")));
    operations.push_status(Ok(Operation::pending("operations/enable-1")));
    operations.push_status(Ok(Operation::succeeded(
        "operations/enable-1",
        json!({"services": []}),
    )));
    let settle_attempts = Mutex::new(0_u32);

    let (clock_ref, progress_ref, ops_ref, attempts_ref) =
        (&clock, &progress, &operations, &settle_attempts);

    let plan = ProvisioningPlan::new()
        .step("enable services", move || async move {
            let request = BatchRequest {
                parent: String::from("projects/demo-123"),
                ids: vec![String::from("run.googleapis.com")],
            };
            let operation = ops_ref
                .submit(&request)
                .await
                .map_err(runctl::OperationError::Submit)?;
            OperationPoller::new(ops_ref, clock_ref, progress_ref)
                .poll(
                    &operation,
                    PollSettings::new(Duration::from_secs(2), Duration::from_secs(60)),
                )
                .await?;
            Ok(())
        })
        .step("create artifact repository", move || async move {
            RetryScheduler::new(clock_ref, progress_ref)
                .retry_until(
                    RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(30)),
                    move || async move {
                        let mut attempts =
                            attempts_ref.lock().unwrap_or_else(|err| err.into_inner());
                        *attempts += 1;
                        if *attempts < 3 {
                            Err(StepError::from(ProcessError::Failure {
                                program: String::from("gcloud"),
                                exit_code: Some(1),
                                signal: None,
                                stderr: String::from("API not enabled"),
                            }))
                        } else {
                            Ok(())
                        }
                    },
                )
                .await?;
            Ok(())
        });

    ProvisioningOrchestrator::new(&progress)
        .run(plan)
        .await
        .expect("plan should succeed");

    assert_eq!(
        clock.sleeps(),
        [
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ]
    );
    assert_eq!(operations.checks(), 2);
    assert!(operations.cancelled().is_empty());
    assert_eq!(*settle_attempts.lock().unwrap_or_else(|err| err.into_inner()), 3);
}
