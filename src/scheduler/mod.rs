//! Two-phase scheduler.
//!
//! ## Algorithm
//!
//! 1. Each phase is announced to the sink, then cases deselected by the name filter are finalized as `Skipped`.
//! 2. **Phase 1 (parallel)**: a bounded pool of worker tasks pulls cases off a shared cursor. Each worker invokes
//!    the command, applies the case's validator and sends the finalized [`RunRecord`] to a single collector over a
//!    channel; the collector is the only writer of the aggregate.
//! 3. **Barrier**: every worker task is awaited. Because a worker only finishes a case after its invocation has
//!    returned (and the invoker reaps its process group before returning), no parallel-phase process is alive
//!    once the barrier is passed.
//! 4. **Phase 2 (exclusive)**: cases run one at a time in catalog order. Retries happen in place, so the order is
//!    never permuted.
//! 5. The [`AggregateReport`] lists every case exactly once, phase first, then catalog order.
//!
//! Per-test faults (launch failure, timeout, validator panic) are verdicts; nothing short of an invalid catalog
//! (rejected before a `Catalog` can exist) aborts a run.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod run;

pub use run::{RunRecord, RunState, TestRun};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use autotest_core::{Catalog, FaultCause, Outcome, Phase, TestCase, Termination, Verdict, evaluate_guarded};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::invoker::{Invoke, ProcessInvoker};
use crate::report::{AggregateReport, ReportSink};

const DESELECTED: &str = "deselected";
const STOPPED: &str = "not run: stopped after first failure";
const INTERRUPTED: &str = "not run: run interrupted";

/// Drives a catalog through both phases.
pub struct Scheduler<I: Invoke = ProcessInvoker> {
    invoker: Arc<I>,
    config: Arc<RunConfig>,
}

impl Scheduler<ProcessInvoker> {
    /// Scheduler backed by real child processes.
    pub fn with_processes(config: RunConfig) -> Self {
        let invoker = ProcessInvoker::from_config(&config);
        Self::new(invoker, config)
    }
}

impl<I: Invoke> Scheduler<I> {
    pub fn new(invoker: I, config: RunConfig) -> Self {
        Self {
            invoker: Arc::new(invoker),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Run every case in `catalog` and return the aggregate.
    ///
    /// Cancelling `cancel` kills in-flight children, finalizes them as `Errored(Interrupted)` and skips everything
    /// not yet dispatched; the call still returns a complete report.
    #[tracing::instrument(skip_all, fields(tests = catalog.len(), workers = self.config.concurrency.get()))]
    pub async fn run(
        &self,
        catalog: &Catalog,
        sink: &mut dyn ReportSink,
        cancel: &CancellationToken,
    ) -> AggregateReport {
        let epoch = Instant::now();
        let ctx = RunContext {
            invoker: Arc::clone(&self.invoker),
            config: Arc::clone(&self.config),
            cancel: cancel.clone(),
            halt: Arc::new(AtomicBool::new(false)),
            epoch,
        };

        sink.on_run_start(catalog.len());

        let mut records = self.run_parallel(catalog.parallel(), &ctx, sink).await;
        tracing::info!(finished = records.len(), "parallel phase drained");
        records.extend(self.run_exclusive(catalog.exclusive(), &ctx, sink).await);

        let report = AggregateReport::new(records, epoch.elapsed());
        sink.on_run_complete(&report);
        report
    }

    async fn run_parallel(
        &self,
        cases: &[Arc<TestCase>],
        ctx: &RunContext<I>,
        sink: &mut dyn ReportSink,
    ) -> Vec<RunRecord> {
        let (work, deselected): (Vec<_>, Vec<_>) = cases
            .iter()
            .cloned()
            .enumerate()
            .partition(|(_, case)| self.config.selects(&case.name));
        sink.on_phase_start(Phase::Parallel, work.len());

        let mut slots: Vec<Option<RunRecord>> = vec![None; cases.len()];
        for (index, case) in deselected {
            let record = TestRun::new(case, ctx.epoch).skip(DESELECTED);
            sink.on_test_complete(&record);
            slots[index] = Some(record);
        }

        let work = Arc::new(work);
        let cursor = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut workers = JoinSet::new();
        let pool = self.config.concurrency.get().min(work.len());

        for worker in 0..pool {
            let work = Arc::clone(&work);
            let cursor = Arc::clone(&cursor);
            let tx = tx.clone();
            let ctx = ctx.clone();
            workers.spawn(async move {
                loop {
                    if ctx.stopped() {
                        break;
                    }
                    let Some((index, case)) = work.get(cursor.fetch_add(1, Ordering::SeqCst)).cloned() else {
                        break;
                    };
                    tracing::debug!(worker, test = %case.name, "dispatch");
                    if tx.send(Event::Started(index, Arc::clone(&case))).is_err() {
                        break;
                    }
                    let record = ctx.execute(&case).await;
                    if tx.send(Event::Finished(index, record)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut in_flight = vec![false; cases.len()];
        while let Some(event) = rx.recv().await {
            match event {
                Event::Started(index, case) => {
                    in_flight[index] = true;
                    sink.on_test_start(&case);
                }
                Event::Finished(index, record) => {
                    in_flight[index] = false;
                    sink.on_test_complete(&record);
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(record);
                    }
                }
            }
        }

        // Barrier: no parallel-phase invocation outlives this loop.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "parallel worker aborted");
            }
        }

        cases
            .iter()
            .zip(slots)
            .zip(in_flight)
            // A case started but never finished belongs to a worker that died mid-run.
            .map(|((case, slot), lost)| match slot {
                Some(record) => record,
                None => {
                    let run = TestRun::new(Arc::clone(case), ctx.epoch);
                    let record = if lost {
                        run.finish(
                            None,
                            Verdict::errored(FaultCause::Interrupted, "worker aborted while the test was running"),
                        )
                    } else {
                        run.skip(ctx.skip_reason())
                    };
                    sink.on_test_complete(&record);
                    record
                }
            })
            .collect()
    }

    async fn run_exclusive(
        &self,
        cases: &[Arc<TestCase>],
        ctx: &RunContext<I>,
        sink: &mut dyn ReportSink,
    ) -> Vec<RunRecord> {
        let selected = cases.iter().filter(|c| self.config.selects(&c.name)).count();
        sink.on_phase_start(Phase::Exclusive, selected);

        let mut records = Vec::with_capacity(cases.len());
        for case in cases {
            let record = if !self.config.selects(&case.name) {
                TestRun::new(Arc::clone(case), ctx.epoch).skip(DESELECTED)
            } else if ctx.stopped() {
                TestRun::new(Arc::clone(case), ctx.epoch).skip(ctx.skip_reason())
            } else {
                tracing::debug!(test = %case.name, "dispatch exclusive");
                sink.on_test_start(case);
                ctx.execute(case).await
            };
            sink.on_test_complete(&record);
            records.push(record);
        }
        records
    }
}

enum Event {
    Started(usize, Arc<TestCase>),
    Finished(usize, RunRecord),
}

/// State shared by every worker of one run.
struct RunContext<I> {
    invoker: Arc<I>,
    config: Arc<RunConfig>,
    cancel: CancellationToken,
    halt: Arc<AtomicBool>,
    epoch: Instant,
}

impl<I> Clone for RunContext<I> {
    fn clone(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            config: Arc::clone(&self.config),
            cancel: self.cancel.clone(),
            halt: Arc::clone(&self.halt),
            epoch: self.epoch,
        }
    }
}

impl<I: Invoke> RunContext<I> {
    /// No further dispatch: interrupted, or halted by stop-on-failure.
    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.halt.load(Ordering::SeqCst)
    }

    fn skip_reason(&self) -> &'static str {
        if self.cancel.is_cancelled() {
            INTERRUPTED
        } else {
            STOPPED
        }
    }

    /// Run one case to a terminal verdict, retrying in place if configured.
    async fn execute(&self, case: &Arc<TestCase>) -> RunRecord {
        let timeout = case.timeout.unwrap_or(self.config.timeout);
        let mut run = TestRun::new(Arc::clone(case), self.epoch);

        loop {
            run.begin_attempt();
            let (outcome, verdict) = match self.invoker.invoke(&case.command, timeout, &self.cancel).await {
                Ok(outcome) => {
                    let verdict = classify(case, &outcome);
                    (Some(outcome), verdict)
                }
                Err(e) => (None, Verdict::errored(FaultCause::LaunchFailure, e.to_string())),
            };

            let retry = !verdict.is_acceptable()
                && run.attempts() <= self.config.retries
                && !self.cancel.is_cancelled()
                && verdict.cause != Some(FaultCause::LaunchFailure);
            if retry {
                tracing::info!(test = %case.name, attempt = run.attempts(), verdict = %verdict, "retrying");
                continue;
            }

            if !verdict.is_acceptable() && self.config.stop_on_failure {
                self.halt.store(true, Ordering::SeqCst);
            }
            if let (Some(path), Some(outcome)) = (&case.report, &outcome) {
                save_artifact(&case.name, path, outcome).await;
            }
            tracing::debug!(test = %case.name, verdict = %verdict, "finished");
            return run.finish(outcome, verdict);
        }
    }
}

/// Map an outcome to a verdict: infrastructure terminations are classified here, everything else by the case's
/// validator.
pub fn classify(case: &TestCase, outcome: &Outcome) -> Verdict {
    match &outcome.termination {
        Termination::LaunchFailure(reason) => Verdict::errored(FaultCause::LaunchFailure, reason.clone()),
        Termination::TimedOut => Verdict::timed_out(format!(
            "killed after {:.1}s",
            outcome.duration.as_secs_f64()
        )),
        Termination::Interrupted => Verdict::errored(FaultCause::Interrupted, "run aborted while the test was running"),
        Termination::Exited(_) | Termination::Signaled(_) => evaluate_guarded(case.validator.as_ref(), outcome),
    }
}

/// Save the captured output to the case's artifact path. Failures are logged; they never change the verdict.
async fn save_artifact(name: &str, path: &std::path::Path, outcome: &Outcome) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(test = name, path = %path.display(), error = %e, "cannot create report directory");
            return;
        }
    }
    if let Err(e) = tokio::fs::write(path, outcome.combined_output()).await {
        tracing::warn!(test = name, path = %path.display(), error = %e, "cannot write report artifact");
    }
}
