#![forbid(unsafe_code)]
//! Two-phase orchestrator for external native test commands.
//!
//! A catalog of named test commands is split into a parallel-safe phase and an exclusive phase. The parallel phase
//! runs across a bounded worker pool; once every one of its processes has exited, the exclusive phase runs strictly
//! one test at a time in catalog order. Each captured outcome is classified by the test's validator and the verdicts
//! are streamed to a report sink and collected into an [`AggregateReport`].
//!
//! The pure data model (catalog, outcomes, verdicts, validators) lives in the `autotest_core` crate. This crate
//! holds everything with side effects: process supervision, scheduling, reporting and the CLI.
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli`, `invoker` and
//!   `scheduler` modules enforce `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Per-test faults**: a test that cannot be launched, times out or trips its validator is a verdict, never a
//!   panic or an error that unwinds the run.

pub mod cli;
pub mod config;
pub mod invoker;
pub mod report;
pub mod scheduler;
pub mod version;

pub use config::RunConfig;
pub use invoker::{Invoke, InvokeError, ProcessInvoker};
pub use report::{AggregateReport, ConsoleReporter, Fanout, JsonLinesReporter, NullSink, ReportSink, Summary};
pub use scheduler::{RunRecord, Scheduler};
