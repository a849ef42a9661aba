//! Polling state machine for long-running operations.
//!
//! The poller moves from `Pending` to exactly one terminal state:
//!
//! - `Done` the first time a status query reports `done == true`;
//! - `TimedOut` once a pending query finishes at or after the timeout, in
//!   which case the operation is cancelled once;
//! - `Failed` when a status query itself errors. Such failures are not
//!   retried and do not cancel the operation.
//!
//! The sleep before the last tick is shortened so that a check lands exactly
//! on the timeout boundary; an operation that finishes at the boundary is
//! therefore reported as done rather than cancelled.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::progress::ProgressSink;

use super::{Operation, OperationClient, OperationError, OperationOutcome, RemoteError};

/// Interval between status queries and the overall polling budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Delay between consecutive status queries.
    pub interval: Duration,
    /// Time after which a still-pending operation is cancelled.
    pub timeout: Duration,
}

impl PollSettings {
    /// Creates settings from an interval and a timeout.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[derive(Debug)]
enum PollState {
    Pending,
    Done(Operation),
    TimedOut,
    Failed(RemoteError),
}

/// Drives a single operation to a terminal state.
pub struct OperationPoller<'a, C: ?Sized, K: ?Sized> {
    client: &'a C,
    clock: &'a K,
    progress: &'a dyn ProgressSink,
}

impl<'a, C, K> OperationPoller<'a, C, K>
where
    C: OperationClient + ?Sized,
    K: Clock + ?Sized,
{
    /// Creates a poller over `client`, timed by `clock`.
    #[must_use]
    pub const fn new(client: &'a C, clock: &'a K, progress: &'a dyn ProgressSink) -> Self {
        Self {
            client,
            clock,
            progress,
        }
    }

    /// Polls `operation` until it is done, the timeout passes, or a status
    /// query fails. The first query happens immediately.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Timeout`] after cancelling an operation that
    /// is still pending at the timeout, [`OperationError::Query`] when a status
    /// query fails, and [`OperationError::Failed`] when the operation finishes
    /// with an error status.
    pub async fn poll(
        &self,
        operation: &Operation,
        settings: PollSettings,
    ) -> Result<Value, OperationError> {
        let started = self.clock.now();
        let mut checks: u32 = 0;
        let mut state = PollState::Pending;

        loop {
            state = match state {
                PollState::Pending => {
                    checks = checks.saturating_add(1);
                    self.tick(&operation.name, started, settings).await
                }
                PollState::Done(snapshot) => {
                    info!(operation = %snapshot.name, checks, "operation done");
                    self.progress.notify("done");
                    return finish(snapshot);
                }
                PollState::TimedOut => {
                    return Err(self.cancel_timed_out(operation, settings.timeout).await);
                }
                PollState::Failed(source) => {
                    return Err(OperationError::Query {
                        name: operation.name.clone(),
                        source,
                    });
                }
            };
        }
    }

    async fn tick(&self, name: &str, started: Instant, settings: PollSettings) -> PollState {
        debug!(operation = name, "querying operation status");
        let snapshot = match self.client.check_progress(name).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(operation = name, error = %err, "operation status query failed");
                return PollState::Failed(err);
            }
        };
        self.progress.notify("checking operation status...");

        if snapshot.done {
            return PollState::Done(snapshot);
        }

        let elapsed = self.clock.elapsed_since(started);
        if elapsed >= settings.timeout {
            return PollState::TimedOut;
        }

        let remaining = settings.timeout.saturating_sub(elapsed);
        self.clock.sleep(settings.interval.min(remaining)).await;
        PollState::Pending
    }

    async fn cancel_timed_out(&self, operation: &Operation, timeout: Duration) -> OperationError {
        warn!(
            operation = %operation.name,
            timeout_secs = timeout.as_secs(),
            "operation timed out, cancelling"
        );
        if let Err(err) = self.client.cancel(operation).await {
            warn!(operation = %operation.name, error = %err, "failed to cancel operation");
        }
        OperationError::Timeout {
            name: operation.name.clone(),
            timeout,
        }
    }
}

fn finish(snapshot: Operation) -> Result<Value, OperationError> {
    match snapshot.result {
        Some(OperationOutcome::Response(response)) => Ok(response),
        Some(OperationOutcome::Error { code, message }) => Err(OperationError::Failed {
            name: snapshot.name,
            code,
            message,
        }),
        None => Ok(Value::Null),
    }
}
