//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::clock::{Clock, SleepFuture};
use crate::operation::{BatchRequest, Operation, OperationClient, OperationFuture, RemoteError};
use crate::process::{
    ExecutionTarget, ExternalCommand, OutputStream, ProcessError, ProcessHandle, ProcessResult,
};
use crate::progress::ProgressSink;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Virtual clock whose time moves only when something sleeps on it or it is
/// advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualClockState>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualClockState::default()),
        }
    }

    /// Moves virtual time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut state = lock(&self.state);
        state.elapsed = state.elapsed.saturating_add(by);
    }

    /// Virtual time elapsed since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        lock(&self.state).elapsed
    }

    /// Every sleep requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + lock(&self.state).elapsed
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        {
            let mut state = lock(&self.state);
            state.elapsed = state.elapsed.saturating_add(duration);
            state.sleeps.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

/// Progress sink that keeps every line for later assertions.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines received so far, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn notify(&self, message: &str) {
        lock(&self.lines).push(message.to_owned());
    }
}

/// Records a single spawn made through [`ScriptedTarget`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the target.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Clone, Debug)]
enum ScriptedProcess {
    Exit {
        result: ProcessResult,
        stdout: String,
        stderr: String,
    },
    SpawnFailure(String),
}

/// Execution target that replays pre-seeded process outcomes in FIFO order
/// without spawning anything.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTarget {
    responses: Arc<Mutex<VecDeque<ScriptedProcess>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedTarget {
    /// Creates a target with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all spawns recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Queues a process that exits with code zero and no output.
    pub fn push_success(&self) {
        self.push_output(ProcessResult::exited(0), "", "");
    }

    /// Queues a process that exits with `code` and writes `stderr`.
    pub fn push_exit_code(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(ProcessResult::exited(code), "", stderr);
    }

    /// Queues a process that is terminated by `signal`.
    pub fn push_signal(&self, signal: i32) {
        self.push_output(ProcessResult::signalled(signal), "", "");
    }

    /// Queues a process with an explicit result and output.
    pub fn push_output(
        &self,
        result: ProcessResult,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(ScriptedProcess::Exit {
            result,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Queues a spawn failure.
    pub fn push_spawn_failure(&self, message: impl Into<String>) {
        lock(&self.responses).push_back(ScriptedProcess::SpawnFailure(message.into()));
    }
}

impl ExecutionTarget for ScriptedTarget {
    fn spawn(&self, command: &ExternalCommand) -> Result<ProcessHandle, ProcessError> {
        lock(&self.invocations).push(CommandInvocation {
            program: command.program().to_owned(),
            args: command
                .arguments()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
        });

        let next = lock(&self.responses).pop_front();
        match next {
            Some(ScriptedProcess::Exit {
                result,
                stdout,
                stderr,
            }) => Ok(ProcessHandle::new(
                command.program(),
                Some(Box::new(Cursor::new(stdout.into_bytes())) as OutputStream),
                Some(Box::new(Cursor::new(stderr.into_bytes())) as OutputStream),
                Box::pin(std::future::ready(Ok::<_, ProcessError>(result))),
            )),
            Some(ScriptedProcess::SpawnFailure(message)) => Err(ProcessError::Spawn {
                program: command.program().to_owned(),
                message,
            }),
            None => Err(ProcessError::Spawn {
                program: command.program().to_owned(),
                message: String::from("no scripted response available"),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct OperationScript {
    submits: VecDeque<Result<Operation, RemoteError>>,
    statuses: VecDeque<Result<Operation, RemoteError>>,
    cancel_failure: Option<RemoteError>,
    submitted: Vec<BatchRequest>,
    checks: u32,
    cancelled: Vec<String>,
}

/// Remote-operation client that replays scripted snapshots.
///
/// Status queries pop queued snapshots in FIFO order; once the queue is empty
/// every further query reports the operation as still pending.
#[derive(Clone, Debug, Default)]
pub struct ScriptedOperationClient {
    script: Arc<Mutex<OperationScript>>,
}

impl ScriptedOperationClient {
    /// Creates a client with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the response to the next submit call.
    pub fn push_submit(&self, response: Result<Operation, RemoteError>) {
        lock(&self.script).submits.push_back(response);
    }

    /// Queues the response to the next status query.
    pub fn push_status(&self, response: Result<Operation, RemoteError>) {
        lock(&self.script).statuses.push_back(response);
    }

    /// Makes every cancel call fail with `error`.
    pub fn fail_cancel(&self, error: RemoteError) {
        lock(&self.script).cancel_failure = Some(error);
    }

    /// Batch requests submitted so far.
    #[must_use]
    pub fn submitted(&self) -> Vec<BatchRequest> {
        lock(&self.script).submitted.clone()
    }

    /// Number of status queries made so far.
    #[must_use]
    pub fn checks(&self) -> u32 {
        lock(&self.script).checks
    }

    /// Names of operations cancelled so far.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.script).cancelled.clone()
    }
}

impl OperationClient for ScriptedOperationClient {
    fn submit<'a>(&'a self, request: &'a BatchRequest) -> OperationFuture<'a, Operation> {
        let mut script = lock(&self.script);
        script.submitted.push(request.clone());
        let response = script
            .submits
            .pop_front()
            .unwrap_or_else(|| Ok(Operation::pending("operations/scripted")));
        Box::pin(std::future::ready(response))
    }

    fn check_progress<'a>(&'a self, name: &'a str) -> OperationFuture<'a, Operation> {
        let mut script = lock(&self.script);
        script.checks = script.checks.saturating_add(1);
        let response = script
            .statuses
            .pop_front()
            .unwrap_or_else(|| Ok(Operation::pending(name)));
        Box::pin(std::future::ready(response))
    }

    fn cancel<'a>(&'a self, operation: &'a Operation) -> OperationFuture<'a, ()> {
        let mut script = lock(&self.script);
        script.cancelled.push(operation.name.clone());
        let response = script.cancel_failure.clone().map_or(Ok(()), Err);
        Box::pin(std::future::ready(response))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
