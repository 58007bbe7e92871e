//! CLI module for the autotest orchestrator
//!
//! ## Commands
//!
//! - `run <catalog>` - Run every test in a catalog (parallel phase, then exclusive phase)
//! - `list <catalog>` - Print the catalog in dispatch order
//! - `check <catalog>` - Validate a catalog without running anything
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use crate::version::AUTOTEST_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// At least one verdict is not Passed/Skipped.
    pub const FAILURE: ExitCode = ExitCode(1);
    /// The catalog could not be loaded; nothing ran.
    pub const CATALOG: ExitCode = ExitCode(2);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Create a catalog error (exit code 2).
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::CATALOG)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Two-phase orchestrator for external native test commands
#[derive(Parser, Debug)]
#[command(name = "autotest")]
#[command(version = AUTOTEST_VERSION)]
#[command(about = "Run a catalog of external test commands: parallel phase first, then exclusive phase", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every test in a catalog
    Run(RunArgs),

    /// List the tests of a catalog in dispatch order
    List {
        /// Catalog manifest (TOML)
        #[arg(value_name = "CATALOG")]
        catalog: PathBuf,
        /// Only list tests whose name contains this substring
        #[arg(short = 'k', value_name = "FILTER")]
        filter: Option<String>,
    },

    /// Validate a catalog without running it
    Check {
        /// Catalog manifest (TOML)
        #[arg(value_name = "CATALOG")]
        catalog: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Catalog manifest (TOML)
    #[arg(value_name = "CATALOG")]
    pub catalog: PathBuf,
    /// Only run tests whose name contains this substring; others are reported as skipped
    #[arg(short = 'k', value_name = "FILTER")]
    pub filter: Option<String>,
    /// Parallel-phase workers (default: available parallelism)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,
    /// Per-test timeout in seconds (overrides the catalog setting)
    #[arg(short = 't', long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,
    /// Stop dispatching after the first failure
    #[arg(short = 'x', long = "exitfirst")]
    pub stop_on_fail: bool,
    /// Retry a failing test in place up to N more times
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub retries: u32,
    /// One line per test instead of progress dots
    #[arg(short, long)]
    pub verbose: bool,
    /// Also write JSON lines (one per test plus a summary) to this file
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Run(args) => commands::run_catalog(args),
        Command::List { catalog, filter } => commands::list_catalog(&catalog, filter.as_deref()),
        Command::Check { catalog } => commands::check_catalog(&catalog),
    }
}

// ============================================================================
// Tests
// ============================================================================
