//! Report sinks and the aggregate report.
//!
//! ## ReportSink Trait
//!
//! The scheduler emits a stream of events to a [`ReportSink`]; formatting and persistence live entirely in the sink.
//! Events arrive from the single collector, never concurrently, so sinks need no locking.
//!
//! Provided sinks:
//! - [`ConsoleReporter`]: coloured progress on stderr (compact dots or one line per test)
//! - [`JsonLinesReporter`]: one JSON object per finished test plus a trailing summary object
//! - [`NullSink`]: discards everything
//! - [`Fanout`]: forwards every event to several sinks

use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use autotest_core::{Phase, Status, TestCase};
use serde::Serialize;

use crate::scheduler::RunRecord;

// ============================================================================
// Report Sink Trait
// ============================================================================

/// Consumer of run events.
pub trait ReportSink {
    /// Called once before anything is dispatched.
    fn on_run_start(&mut self, _total: usize) {}

    /// Called when a phase begins, with the number of selected cases in it.
    fn on_phase_start(&mut self, _phase: Phase, _selected: usize) {}

    /// Called when a case is dispatched
    fn on_test_start(&mut self, _case: &TestCase) {}

    /// Called exactly once per case with its final record.
    fn on_test_complete(&mut self, record: &RunRecord);

    /// Called after both phases with the complete report.
    fn on_run_complete(&mut self, report: &AggregateReport);
}

// ============================================================================
// Aggregate report
// ============================================================================

/// Summary counts over every record of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub timed_out: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl Summary {
    pub fn from_records(records: &[RunRecord], duration: Duration) -> Self {
        let mut summary = Summary {
            total: records.len(),
            duration,
            ..Summary::default()
        };
        for record in records {
            match record.status() {
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Errored => summary.errored += 1,
                Status::Skipped => summary.skipped += 1,
                Status::TimedOut => summary.timed_out += 1,
            }
        }
        summary
    }

    /// Every verdict is Passed or Skipped.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.timed_out == 0
    }
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Every record of a run in phase-then-catalog order, plus counts. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    records: Vec<RunRecord>,
    summary: Summary,
}

impl AggregateReport {
    pub fn new(records: Vec<RunRecord>, duration: Duration) -> Self {
        let summary = Summary::from_records(&records, duration);
        Self { records, summary }
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn get(&self, name: &str) -> Option<&RunRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Records whose verdict is neither Passed nor Skipped.
    pub fn failures(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().filter(|r| !r.verdict.is_acceptable())
    }

    pub fn success(&self) -> bool {
        self.summary.success()
    }
}

// ============================================================================
// Console
// ============================================================================

/// Coloured progress on stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
    pub color: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            color: io::IsTerminal::is_terminal(&io::stderr()),
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        paint(self.color, code, text)
    }
}

fn paint(color: bool, code: &str, text: &str) -> String {
    if color {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    } else {
        text.to_string()
    }
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Passed => "32",
        Status::Skipped => "33",
        Status::Failed | Status::Errored | Status::TimedOut => "31",
    }
}

fn status_dot(status: Status) -> &'static str {
    match status {
        Status::Passed => ".",
        Status::Failed => "F",
        Status::Errored => "E",
        Status::Skipped => "s",
        Status::TimedOut => "T",
    }
}

/// One verbose result line, e.g. `Cycles autotest ... PASSED (12ms)`.
pub fn render_record(record: &RunRecord, color: bool) -> String {
    let status = record.status();
    let mut line = format!(
        "{} ... {}",
        record.name,
        paint(color, status_color(status), status.as_str())
    );
    match status {
        Status::Skipped => {
            if !record.verdict.message.is_empty() {
                let _ = write!(line, " ({})", record.verdict.message);
            }
        }
        _ => {
            let _ = write!(line, " ({}ms)", record.duration.as_millis());
        }
    }
    if record.attempts > 1 {
        let _ = write!(line, " [{} attempts]", record.attempts);
    }
    line
}

/// Final banner, e.g. `====== 3 passed, 1 failed in 0.52s ======`.
pub fn render_summary(summary: &Summary, color: bool) -> String {
    let mut parts = Vec::new();
    let counts = [
        (summary.passed, "passed", "32"),
        (summary.failed, "failed", "31"),
        (summary.errored, "errored", "31"),
        (summary.timed_out, "timed out", "31"),
        (summary.skipped, "skipped", "33"),
    ];
    for (count, label, code) in counts {
        if count > 0 {
            parts.push(paint(color, code, &format!("{} {}", count, label)));
        }
    }
    if parts.is_empty() {
        parts.push("no tests ran".to_string());
    }
    format!(
        "====== {} in {:.2}s ======",
        parts.join(", "),
        summary.duration.as_secs_f64()
    )
}

impl ReportSink for ConsoleReporter {
    fn on_run_start(&mut self, total: usize) {
        if total == 0 {
            eprintln!("No tests in catalog");
        } else {
            eprintln!("{}", self.paint("1", &format!("collected {} test(s)", total)));
        }
    }

    fn on_phase_start(&mut self, phase: Phase, selected: usize) {
        if self.verbose {
            eprintln!();
            eprintln!("{}", self.paint("1", &format!("--- {} phase: {} test(s) ---", phase, selected)));
        }
    }

    fn on_test_complete(&mut self, record: &RunRecord) {
        if self.verbose {
            eprintln!("{}", render_record(record, self.color));
        } else {
            let status = record.status();
            eprint!("{}", self.paint(status_color(status), status_dot(status)));
        }
    }

    fn on_run_complete(&mut self, report: &AggregateReport) {
        if !self.verbose {
            eprintln!();
        }

        let failures: Vec<_> = report.failures().collect();
        if !failures.is_empty() {
            eprintln!();
            eprintln!("{}", self.paint("1;31", "=================== FAILURES ==================="));
            for record in failures {
                eprintln!();
                eprintln!("{}", self.paint("1", &format!("___________ {} ___________", record.name)));
                eprintln!("    {}", record.verdict);
                eprintln!("    $ {}", record.command);
                if let Some(path) = &record.report {
                    eprintln!("    output saved to {}", path.display());
                }
            }
        }

        eprintln!();
        eprintln!("{}", render_summary(report.summary(), self.color));
    }
}

// ============================================================================
// JSON lines
// ============================================================================

/// One JSON object per finished test, then `{"summary": ...}`.
#[derive(Debug)]
pub struct JsonLinesReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit<T: Serialize>(&mut self, value: &T) {
        let written = serde_json::to_writer(&mut self.out, value)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(self.out));
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write JSON report line");
        }
    }
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: &'a Summary,
    success: bool,
}

impl<W: Write> ReportSink for JsonLinesReporter<W> {
    fn on_test_complete(&mut self, record: &RunRecord) {
        self.emit(record);
    }

    fn on_run_complete(&mut self, report: &AggregateReport) {
        self.emit(&SummaryLine {
            summary: report.summary(),
            success: report.success(),
        });
        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "failed to flush JSON report");
        }
    }
}

// ============================================================================
// Null / Fanout
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn on_test_complete(&mut self, _record: &RunRecord) {}

    fn on_run_complete(&mut self, _report: &AggregateReport) {}
}

/// Forwards every event to each sink in order.
#[derive(Default)]
pub struct Fanout<'a> {
    sinks: Vec<Box<dyn ReportSink + 'a>>,
}

impl<'a> Fanout<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl ReportSink + 'a) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn ReportSink + 'a>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for Fanout<'_> {
    fn on_run_start(&mut self, total: usize) {
        self.sinks.iter_mut().for_each(|s| s.on_run_start(total));
    }

    fn on_phase_start(&mut self, phase: Phase, selected: usize) {
        self.sinks.iter_mut().for_each(|s| s.on_phase_start(phase, selected));
    }

    fn on_test_start(&mut self, case: &TestCase) {
        self.sinks.iter_mut().for_each(|s| s.on_test_start(case));
    }

    fn on_test_complete(&mut self, record: &RunRecord) {
        self.sinks.iter_mut().for_each(|s| s.on_test_complete(record));
    }

    fn on_run_complete(&mut self, report: &AggregateReport) {
        self.sinks.iter_mut().for_each(|s| s.on_run_complete(report));
    }
}
