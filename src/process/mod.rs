//! External process execution with exit tracking and cancellation.
//!
//! [`ProcessRunner`] launches an [`ExternalCommand`] through an
//! [`ExecutionTarget`] and hands back a [`ProcessHandle`] that owns the
//! child's output streams and its exit notification. Spawning never waits for
//! the child; callers suspend only when they await the handle.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::io::{self, AsyncRead};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod collect;

pub use collect::{collect, collect_optional};

/// Readable output stream owned by a [`ProcessHandle`].
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Future resolving once the process reaches a terminal state.
pub type ExitFuture = Pin<Box<dyn Future<Output = Result<ProcessResult, ProcessError>> + Send>>;

/// Options applied when the process is spawned.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SpawnOptions {
    /// Working directory for the child; inherits the caller's when `None`.
    pub current_dir: Option<Utf8PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub envs: Vec<(OsString, OsString)>,
}

/// Program, arguments, and spawn options for one external invocation.
///
/// The value is assembled with the consuming builder methods and is not
/// mutated after it is handed to [`ProcessRunner::run`].
#[derive(Clone, Debug)]
pub struct ExternalCommand {
    program: String,
    args: Vec<OsString>,
    options: SpawnOptions,
    cancellation: Option<CancellationToken>,
}

impl ExternalCommand {
    /// Starts a command for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            options: SpawnOptions::default(),
            cancellation: None,
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments in order.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Runs the child in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.options.current_dir = Some(dir.into());
        self
    }

    /// Sets an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.options.envs.push((key.into(), value.into()));
        self
    }

    /// Terminates the child when `token` is cancelled.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in the order they are passed to the program.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Options applied at spawn time.
    #[must_use]
    pub const fn options(&self) -> &SpawnOptions {
        &self.options
    }

    /// Cancellation token supplied at construction, if any.
    #[must_use]
    pub const fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Renders the command as a shell-escaped string for logs and messages.
    #[must_use]
    pub fn display(&self) -> String {
        let mut rendered = escape(Cow::Borrowed(self.program.as_str())).into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&escape(arg.to_string_lossy()));
        }
        rendered
    }
}

/// Terminal state of a process.
///
/// `exit_code` is only present when the process was not killed by a signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessResult {
    /// Exit code reported by the process.
    pub exit_code: Option<i32>,
    /// Signal that terminated the process.
    pub signal: Option<i32>,
}

impl ProcessResult {
    /// Result for a process that exited normally with `code`.
    #[must_use]
    pub const fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            signal: None,
        }
    }

    /// Result for a process terminated by `signal`.
    #[must_use]
    pub const fn signalled(signal: i32) -> Self {
        Self {
            exit_code: None,
            signal: Some(signal),
        }
    }

    /// Converts an OS exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            exit_code: status.code(),
            signal: terminating_signal(status),
        }
    }

    /// Returns `true` only for exit code zero without a signal.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0)) && self.signal.is_none()
    }

    /// Turns a non-successful result into [`ProcessError::Failure`].
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Failure`] when the exit code is non-zero or a
    /// signal terminated the process, whatever output was captured.
    pub fn into_success(self, program: &str, stderr: String) -> Result<Self, ProcessError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ProcessError::Failure {
            program: program.to_owned(),
            exit_code: self.exit_code,
            signal: self.signal,
            stderr,
        })
    }
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&status_text(self.exit_code, self.signal))
    }
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
const fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}

fn status_text(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (_, Some(signal)) => format!("signal {signal}"),
        (Some(code), None) => format!("exit code {code}"),
        (None, None) => String::from("unknown status"),
    }
}

fn failure_status(exit_code: &Option<i32>, signal: &Option<i32>) -> String {
    status_text(*exit_code, *signal)
}

fn stderr_note(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// Errors surfaced while launching or awaiting an external process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when the executable cannot be launched at all.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the process exits non-zero or is killed by a signal.
    #[error("{program} failed with {}{}", failure_status(.exit_code, .signal), stderr_note(.stderr))]
    Failure {
        /// Program that failed.
        program: String,
        /// Exit code, absent when a signal terminated the process.
        exit_code: Option<i32>,
        /// Terminating signal, if any.
        signal: Option<i32>,
        /// Standard error captured before exit.
        stderr: String,
    },
    /// Raised when the exit status or an output stream cannot be read.
    #[error("i/o error while running {program}: {message}")]
    Io {
        /// Program being supervised.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Live external process.
///
/// Owns the child's output streams until they are taken and resolves its exit
/// notification exactly once through [`ProcessHandle::wait`] or
/// [`ProcessHandle::await_exit`].
pub struct ProcessHandle {
    program: String,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit: ExitFuture,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Assembles a handle from its parts. Execution targets other than the
    /// operating system (for example scripted test targets) use this.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        stdout: Option<OutputStream>,
        stderr: Option<OutputStream>,
        exit: ExitFuture,
    ) -> Self {
        Self {
            program: program.into(),
            stdout,
            stderr,
            exit,
        }
    }

    /// Program the handle supervises.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Takes ownership of standard output.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Takes ownership of standard error.
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Suspends until the process terminates and returns its raw result.
    ///
    /// Streams that were not taken are drained and discarded alongside the
    /// exit wait, so a child never blocks on a full pipe nobody reads.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Io`] when the exit status cannot be read.
    pub async fn wait(self) -> Result<ProcessResult, ProcessError> {
        let Self {
            program,
            stdout,
            stderr,
            exit,
        } = self;
        let ((), (), result) = tokio::join!(
            discard(stdout, &program),
            discard(stderr, &program),
            exit,
        );
        result
    }

    /// Suspends until the process terminates, failing on any unsuccessful
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Failure`] for a non-zero exit code or a
    /// terminating signal, and [`ProcessError::Io`] when the status cannot be
    /// read.
    pub async fn await_exit(self) -> Result<ProcessResult, ProcessError> {
        let program = self.program.clone();
        self.wait().await?.into_success(&program, String::new())
    }
}

async fn discard(stream: Option<OutputStream>, program: &str) {
    let Some(mut reader) = stream else {
        return;
    };
    if let Err(err) = io::copy(&mut reader, &mut io::sink()).await {
        debug!(program = %program, error = %err, "failed to drain unread output");
    }
}

/// Launches external programs; the seam between the core and the host.
pub trait ExecutionTarget: Send + Sync {
    /// Starts `command` and returns a handle without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] when the executable cannot be launched.
    fn spawn(&self, command: &ExternalCommand) -> Result<ProcessHandle, ProcessError>;
}

/// Execution target that spawns real processes through Tokio.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioExecutionTarget;

impl ExecutionTarget for TokioExecutionTarget {
    fn spawn(&self, command: &ExternalCommand) -> Result<ProcessHandle, ProcessError> {
        let mut process = Command::new(command.program());
        process
            .args(command.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.options().current_dir {
            process.current_dir(dir);
        }
        for (key, value) in &command.options().envs {
            process.env(key, value);
        }

        let mut child = process.spawn().map_err(|err| ProcessError::Spawn {
            program: command.program().to_owned(),
            message: err.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .map(|stream| Box::new(stream) as OutputStream);
        let stderr = child
            .stderr
            .take()
            .map(|stream| Box::new(stream) as OutputStream);
        let exit = Box::pin(wait_for_exit(
            child,
            command.program().to_owned(),
            command.cancellation().cloned(),
        ));

        Ok(ProcessHandle::new(command.program(), stdout, stderr, exit))
    }
}

async fn wait_for_exit(
    mut child: Child,
    program: String,
    cancellation: Option<CancellationToken>,
) -> Result<ProcessResult, ProcessError> {
    let waited = match cancellation {
        Some(token) => {
            tokio::select! {
                status = child.wait() => status,
                () = token.cancelled() => {
                    info!(program = %program, "cancellation requested, terminating process");
                    if let Err(err) = child.start_kill() {
                        warn!(program = %program, error = %err, "failed to signal process");
                    }
                    child.wait().await
                }
            }
        }
        None => child.wait().await,
    };

    let status = waited.map_err(|err| ProcessError::Io {
        program: program.clone(),
        message: err.to_string(),
    })?;
    let result = ProcessResult::from_status(status);
    info!(
        program = %program,
        exit_code = ?result.exit_code,
        signal = ?result.signal,
        "process exited"
    );
    Ok(result)
}

/// Output collected from a process that completed successfully.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Terminal state of the process.
    pub result: ProcessResult,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Spawns commands through an [`ExecutionTarget`].
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner<T = TokioExecutionTarget> {
    target: T,
}

impl ProcessRunner<TokioExecutionTarget> {
    /// Runner that spawns real operating-system processes.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(TokioExecutionTarget)
    }
}

impl<T: ExecutionTarget> ProcessRunner<T> {
    /// Creates a runner over `target`.
    #[must_use]
    pub const fn new(target: T) -> Self {
        Self { target }
    }

    /// Returns the underlying execution target.
    #[must_use]
    pub const fn target(&self) -> &T {
        &self.target
    }

    /// Spawns `command` and returns its handle immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] when the executable cannot be launched.
    pub fn run(&self, command: &ExternalCommand) -> Result<ProcessHandle, ProcessError> {
        debug!(command = %command.display(), "spawning process");
        self.target.spawn(command)
    }

    /// Spawns `command`, drains both output streams while waiting for exit,
    /// and fails unless the process exits with code zero.
    ///
    /// Both streams are drained concurrently with the exit wait, so a child
    /// that fills its pipe buffers cannot block on a reader that has not
    /// started yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] when the command cannot start,
    /// [`ProcessError::Failure`] (carrying captured stderr) when it exits
    /// unsuccessfully, and [`ProcessError::Io`] when reading fails.
    pub async fn output(&self, command: &ExternalCommand) -> Result<CommandOutput, ProcessError> {
        let mut handle = self.run(command)?;
        let program = handle.program().to_owned();
        let stdout_stream = handle.take_stdout();
        let stderr_stream = handle.take_stderr();

        let (stdout, stderr, exit) = tokio::join!(
            collect_optional(stdout_stream),
            collect_optional(stderr_stream),
            handle.wait(),
        );

        let result = exit?;
        let stdout_text = stdout.map_err(|err| io_failure(&program, &err))?;
        let stderr_text = stderr.map_err(|err| io_failure(&program, &err))?;
        let checked = result.into_success(&program, stderr_text.clone())?;

        Ok(CommandOutput {
            result: checked,
            stdout: stdout_text,
            stderr: stderr_text,
        })
    }
}

fn io_failure(program: &str, err: &std::io::Error) -> ProcessError {
    ProcessError::Io {
        program: program.to_owned(),
        message: err.to_string(),
    }
}
