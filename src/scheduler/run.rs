//! Per-test run records.
//!
//! A [`TestRun`] is created when a case is dispatched and is owned by the worker executing it. Finishing it
//! consumes the run and yields an immutable [`RunRecord`], which is what the aggregator receives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autotest_core::{Outcome, Phase, Status, TestCase, Termination, Verdict};
use serde::Serialize;

/// Lifecycle of an in-flight run. Terminal states live on [`RunRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
}

/// A dispatched test case, exclusively owned by one worker.
#[derive(Debug)]
pub struct TestRun {
    case: Arc<TestCase>,
    state: RunState,
    epoch: Instant,
    started: Duration,
    attempts: u32,
}

impl TestRun {
    /// `epoch` is the run start all offsets are measured from.
    pub fn new(case: Arc<TestCase>, epoch: Instant) -> Self {
        Self {
            case,
            state: RunState::Pending,
            epoch,
            started: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn case(&self) -> &Arc<TestCase> {
        &self.case
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pending → Running. Each call counts one attempt; the start time is that of the first.
    pub fn begin_attempt(&mut self) {
        if self.state == RunState::Pending {
            self.started = self.epoch.elapsed();
            self.state = RunState::Running;
        }
        self.attempts += 1;
    }

    /// Finalize with the last attempt's outcome and verdict.
    pub fn finish(self, outcome: Option<Outcome>, verdict: Verdict) -> RunRecord {
        let finished = self.epoch.elapsed();
        let duration = outcome
            .as_ref()
            .map(|o| o.duration)
            .unwrap_or_else(|| finished.saturating_sub(self.started));
        RunRecord {
            name: self.case.name.clone(),
            phase: self.case.phase,
            command: self.case.command.to_string(),
            verdict,
            duration,
            started: self.started,
            finished,
            attempts: self.attempts,
            termination: outcome.as_ref().map(|o| o.termination.clone()),
            report: self.case.report.clone(),
            outcome,
        }
    }

    /// Finalize a case that was never dispatched.
    pub fn skip(self, reason: impl Into<String>) -> RunRecord {
        let at = self.epoch.elapsed();
        RunRecord {
            name: self.case.name.clone(),
            phase: self.case.phase,
            command: self.case.command.to_string(),
            verdict: Verdict::skipped(reason),
            duration: Duration::ZERO,
            started: at,
            finished: at,
            attempts: 0,
            termination: None,
            report: self.case.report.clone(),
            outcome: None,
        }
    }
}

/// Finalized, immutable summary of one test.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub name: String,
    pub phase: Phase,
    pub command: String,
    pub verdict: Verdict,
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
    /// Offset from run start at which the first attempt began.
    #[serde(rename = "started_ms", with = "millis")]
    pub started: Duration,
    /// Offset from run start at which the run was finalized.
    #[serde(rename = "finished_ms", with = "millis")]
    pub finished: Duration,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
    #[serde(skip)]
    pub outcome: Option<Outcome>,
}

impl RunRecord {
    pub fn status(&self) -> Status {
        self.verdict.status
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
