//! Captured result of one external test invocation.
//!
//! An [`Outcome`] is produced by the process invoker and consumed by a validator in the same call. Infrastructure
//! failures (the command never started, it ran past its deadline, the run was aborted) are encoded as a
//! [`Termination`] variant instead of an error, so every invocation yields data the scheduler can classify uniformly.

use std::time::Duration;

use serde::Serialize;

/// How the child process ended (or why it never ran).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The process was killed by a signal it did not receive from us.
    Signaled(Option<i32>),
    /// The deadline expired and the process group was killed.
    TimedOut,
    /// A run-level abort killed the process group.
    Interrupted,
    /// The command could not be started at all.
    LaunchFailure(String),
}

/// Everything a validator may look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// At least one output stream hit the capture limit.
    pub truncated: bool,
}

impl Outcome {
    /// Outcome of a process that exited normally.
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>, duration: Duration) -> Self {
        Self {
            termination: Termination::Exited(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration,
            truncated: false,
        }
    }

    /// Outcome of a command that could not be spawned.
    pub fn launch_failure(reason: impl Into<String>) -> Self {
        Self {
            termination: Termination::LaunchFailure(reason.into()),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            truncated: false,
        }
    }

    pub fn timed_out(stdout: impl Into<String>, stderr: impl Into<String>, duration: Duration) -> Self {
        Self {
            termination: Termination::TimedOut,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration,
            truncated: false,
        }
    }

    /// Exit code, if the process exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }

    pub fn is_launch_failure(&self) -> bool {
        matches!(self.termination, Termination::LaunchFailure(_))
    }

    pub fn is_interrupted(&self) -> bool {
        self.termination == Termination::Interrupted
    }

    /// `true` iff the process exited with status zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// stdout followed by stderr, for markers that may land on either stream.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
