//! Scripted stand-in for the process invoker, recording the lifetime of every invocation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use autotest::{Invoke, InvokeError};
use autotest_core::{CommandSpec, Outcome, Termination};
use tokio_util::sync::CancellationToken;

/// What a scripted command does when invoked.
#[derive(Debug, Clone)]
pub struct Script {
    pub delay: Duration,
    pub stdout: String,
    pub exit: i32,
    /// The first `flaky` attempts exit 1 with no output.
    pub flaky: u32,
    pub launch_failure: bool,
}

impl Script {
    pub fn ok(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            stdout: "Test OK\n".to_string(),
            exit: 0,
            flaky: 0,
            launch_failure: false,
        }
    }

    pub fn failing(delay_ms: u64) -> Self {
        Self {
            stdout: String::new(),
            exit: 1,
            ..Self::ok(delay_ms)
        }
    }

    pub fn flaky(delay_ms: u64, failures: u32) -> Self {
        Self {
            flaky: failures,
            ..Self::ok(delay_ms)
        }
    }

    pub fn missing() -> Self {
        Self {
            launch_failure: true,
            ..Self::ok(0)
        }
    }
}

/// One invocation as observed by the fake: program name plus start and end instants.
#[derive(Debug, Clone)]
pub struct Span {
    pub program: String,
    pub start: Instant,
    pub end: Instant,
}

enum Ending {
    Completed,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Default)]
pub struct FakeInvoker {
    scripts: HashMap<String, Script>,
    spans: Mutex<Vec<Span>>,
    attempts: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, program: &str, script: Script) -> Self {
        self.scripts.insert(program.to_string(), script);
        self
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    pub fn span(&self, program: &str) -> Span {
        self.spans()
            .into_iter()
            .rfind(|s| s.program == program)
            .unwrap_or_else(|| panic!("{} never ran", program))
    }

    pub fn attempts(&self, program: &str) -> u32 {
        self.attempts.lock().unwrap().get(program).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously running invocations.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Invoke for FakeInvoker {
    async fn invoke(
        &self,
        command: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Outcome, InvokeError> {
        let program = command.program().to_string();
        let script = self.scripts.get(&program).cloned().unwrap_or_else(|| Script::ok(0));
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(program.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if script.launch_failure {
            return Ok(Outcome::launch_failure(format!("{}: No such file or directory", program)));
        }

        let start = Instant::now();
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let ending = tokio::select! {
            _ = tokio::time::sleep(script.delay.min(timeout)) => {
                if script.delay > timeout { Ending::TimedOut } else { Ending::Completed }
            }
            _ = cancel.cancelled() => Ending::Interrupted,
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        let end = Instant::now();
        self.spans.lock().unwrap().push(Span { program, start, end });

        let duration = end - start;
        match ending {
            Ending::Interrupted => {
                return Ok(Outcome {
                    termination: Termination::Interrupted,
                    ..Outcome::exited(0, "", "", duration)
                });
            }
            Ending::TimedOut => return Ok(Outcome::timed_out("", "", duration)),
            Ending::Completed => {}
        }
        if attempt <= script.flaky {
            return Ok(Outcome::exited(1, "", "", duration));
        }
        Ok(Outcome::exited(script.exit, script.stdout, "", duration))
    }
}
