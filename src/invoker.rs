//! Process invoker: run one test command as a supervised child process.
//!
//! ## Contract
//!
//! - [`Invoke::invoke`] returns within `timeout` plus a bounded cleanup period.
//! - Expected failures are data: a command that cannot be started yields [`Termination::LaunchFailure`], a deadline
//!   overrun yields [`Termination::TimedOut`], a run-level abort yields [`Termination::Interrupted`]. Only a
//!   malformed command is an [`InvokeError`].
//! - On unix every child leads its own process group. The group is sent `SIGKILL` when the child is timed out or
//!   interrupted, and swept again after a normal exit, so no descendant outlives the call.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use autotest_core::{CommandSpec, Outcome, Termination};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_DRAIN_GRACE, DEFAULT_MAX_OUTPUT_BYTES, RunConfig};

/// Contract violations; everything else is reported through the [`Outcome`].
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("malformed command `{command}`: {reason}")]
    MalformedCommand { command: String, reason: String },
}

/// Launch a command and capture its outcome.
///
/// The scheduler is generic over this seam so runs can be instrumented without real processes.
pub trait Invoke: Send + Sync + 'static {
    fn invoke(
        &self,
        command: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Outcome, InvokeError>> + Send;
}

/// Runs commands as real child processes via tokio.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    max_output_bytes: usize,
    drain_grace: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_output_bytes: config.max_output_bytes,
            drain_grace: config.drain_grace,
        }
    }

    fn build_command(command: &CommandSpec) -> Command {
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .envs(command.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = command.cwd() {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// How the wait on the child ended.
enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
    WaitFailed(io::Error),
}

impl Invoke for ProcessInvoker {
    #[tracing::instrument(skip_all, fields(command = %command, timeout_ms = timeout.as_millis() as u64))]
    async fn invoke(
        &self,
        command: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Outcome, InvokeError> {
        if command.program().trim().is_empty() {
            return Err(InvokeError::MalformedCommand {
                command: command.to_string(),
                reason: "empty program".to_string(),
            });
        }

        let start = Instant::now();
        let mut child = match Self::build_command(command).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                return Err(InvokeError::MalformedCommand {
                    command: command.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!(error = %e, "launch failed");
                return Ok(Outcome::launch_failure(format!("{}: {}", command.program(), e)));
            }
        };
        let pid = child.id();

        let stdout = Capture::shared();
        let stderr = Capture::shared();
        let readers = [
            child
                .stdout
                .take()
                .map(|pipe| spawn_reader(pipe, Arc::clone(&stdout), self.max_output_bytes)),
            child
                .stderr
                .take()
                .map(|pipe| spawn_reader(pipe, Arc::clone(&stderr), self.max_output_bytes)),
        ];

        let ending = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Ending::Exited(status),
                Err(e) => Ending::WaitFailed(e),
            },
            _ = tokio::time::sleep(timeout) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Interrupted,
        };

        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        if !matches!(ending, Ending::Exited(_)) {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "child already gone");
            }
            if let Err(e) = child.wait().await {
                tracing::warn!(error = %e, "failed to reap child");
            }
        }
        let duration = start.elapsed();

        let drain_deadline = tokio::time::Instant::now() + self.drain_grace;
        for reader in readers.into_iter().flatten() {
            let abort = reader.abort_handle();
            if tokio::time::timeout_at(drain_deadline, reader).await.is_err() {
                tracing::debug!("output pipe still open after grace period");
                abort.abort();
            }
        }

        let termination = match ending {
            Ending::Exited(status) => termination_of(status),
            Ending::TimedOut => {
                tracing::info!(elapsed_ms = duration.as_millis() as u64, "timed out, process group killed");
                Termination::TimedOut
            }
            Ending::Interrupted => Termination::Interrupted,
            Ending::WaitFailed(e) => {
                tracing::warn!(error = %e, "wait on child failed");
                Termination::Signaled(None)
            }
        };

        let (stdout, out_truncated) = Capture::finish(&stdout);
        let (stderr, err_truncated) = Capture::finish(&stderr);
        Ok(Outcome {
            termination,
            stdout,
            stderr,
            duration,
            truncated: out_truncated || err_truncated,
        })
    }
}

fn termination_of(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        Termination::Signaled(status.signal())
    }
    #[cfg(not(unix))]
    {
        Termination::Signaled(None)
    }
}

/// Bytes captured from one pipe, shared with its reader task so a partial capture survives an aborted reader.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn shared() -> Arc<Mutex<Capture>> {
        Arc::new(Mutex::new(Capture::default()))
    }

    fn finish(shared: &Mutex<Capture>) -> (String, bool) {
        let capture = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (String::from_utf8_lossy(&capture.bytes).into_owned(), capture.truncated)
    }
}

/// Read a pipe to EOF, keeping at most `limit` bytes. Reading continues past the limit so the child never blocks
/// on a full pipe.
fn spawn_reader<R>(mut pipe: R, sink: Arc<Mutex<Capture>>, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut capture = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    let room = limit.saturating_sub(capture.bytes.len());
                    if n > room {
                        capture.truncated = true;
                    }
                    capture.bytes.extend_from_slice(&chunk[..n.min(room)]);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pgid = raw, "process group killed"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid = raw, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
