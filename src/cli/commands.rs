//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use autotest_core::manifest::{Settings, load_catalog};
use autotest_core::{Catalog, CatalogError, Phase};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{CliError, CliResult, ExitCode, RunArgs};
use crate::config::RunConfig;
use crate::report::{ConsoleReporter, Fanout, JsonLinesReporter};
use crate::scheduler::Scheduler;

/// Maximum catalog file size (10 MB)
const MAX_CATALOG_SIZE: u64 = 10 * 1024 * 1024;

/// Why a catalog file could not be turned into a [`Catalog`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read catalog '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog '{path}' is too large ({size} bytes, max {max} bytes)")]
    TooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("invalid catalog '{path}'")]
    Catalog {
        path: PathBuf,
        #[source]
        source: CatalogError,
    },
}

impl From<LoadError> for CliError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Catalog { path, source } => {
                let report = miette::Report::new(source).wrap_err(format!("invalid catalog '{}'", path.display()));
                CliError::catalog(format!("{:?}", report))
            }
            other => CliError::catalog(format!("Error: {}", other)),
        }
    }
}

// ============================================================================
// Catalog loading
// ============================================================================

/// Read and validate a catalog manifest.
///
/// ## Errors
///
/// Returns an error if:
/// - The file cannot be read (I/O error)
/// - The file exceeds `MAX_CATALOG_SIZE` (10 MB)
/// - The manifest is malformed or names a test twice
pub fn load_catalog_file(path: &Path) -> Result<(Catalog, Settings), LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(path).map_err(io_err)?;
    if metadata.len() > MAX_CATALOG_SIZE {
        return Err(LoadError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max: MAX_CATALOG_SIZE,
        });
    }
    let source = fs::read_to_string(path).map_err(io_err)?;
    load_catalog(&source).map_err(|source| LoadError::Catalog {
        path: path.to_path_buf(),
        source,
    })
}

/// CLI flags over catalog `[settings]` over defaults.
pub fn build_config(args: &RunArgs, settings: &Settings) -> RunConfig {
    let mut config = RunConfig::from_settings(settings)
        .with_retries(args.retries)
        .with_stop_on_failure(args.stop_on_fail)
        .with_filter(args.filter.clone());
    if let Some(jobs) = args.jobs {
        config = config.with_concurrency(jobs);
    }
    if let Some(secs) = args.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    config
}

// ============================================================================
// Commands
// ============================================================================

/// `autotest run`: both phases, console progress, optional JSON lines.
pub fn run_catalog(args: RunArgs) -> CliResult<ExitCode> {
    let (catalog, settings) = load_catalog_file(&args.catalog)?;
    let config = build_config(&args, &settings);
    tracing::info!(
        catalog = %args.catalog.display(),
        tests = catalog.len(),
        workers = config.concurrency.get(),
        timeout_s = config.timeout.as_secs(),
        "starting run"
    );

    let mut sinks = Fanout::new().with(ConsoleReporter::new(args.verbose));
    if let Some(path) = &args.json {
        let file = File::create(path)
            .map_err(|e| CliError::failure(format!("Cannot create JSON report '{}': {}", path.display(), e)))?;
        sinks = sinks.with(JsonLinesReporter::new(BufWriter::new(file)));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("Cannot start async runtime: {}", e)))?;

    let scheduler = Scheduler::with_processes(config);
    let cancel = CancellationToken::new();
    let report = runtime.block_on(async {
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                watcher.cancel();
            }
        });
        scheduler.run(&catalog, &mut sinks, &cancel).await
    });

    if report.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        // Summary already printed by the console reporter
        Err(CliError::new("", ExitCode::FAILURE))
    }
}

/// `autotest list`: one line per test in dispatch order.
pub fn list_catalog(path: &Path, filter: Option<&str>) -> CliResult<ExitCode> {
    let (catalog, _) = load_catalog_file(path)?;
    for line in render_listing(&catalog, filter) {
        println!("{}", line);
    }
    Ok(ExitCode::SUCCESS)
}

/// `autotest check`: load and validate only.
pub fn check_catalog(path: &Path) -> CliResult<ExitCode> {
    let (catalog, _) = load_catalog_file(path)?;
    println!(
        "{}: ok ({} parallel, {} exclusive)",
        path.display(),
        catalog.parallel().len(),
        catalog.exclusive().len()
    );
    Ok(ExitCode::SUCCESS)
}

fn render_listing(catalog: &Catalog, filter: Option<&str>) -> Vec<String> {
    let selection = catalog.filtered(filter.unwrap_or_default());
    let mut lines = Vec::new();
    for phase in Phase::ALL {
        let mut cases = selection.selected.iter().filter(|c| c.phase == phase).peekable();
        if cases.peek().is_none() {
            continue;
        }
        lines.push(format!("[{}]", phase));
        for case in cases {
            lines.push(format!("  {} ({}): {}", case.name, case.validator.name(), case.command));
        }
    }
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Command};

    const CATALOG: &str = r#"
[settings]
timeout_secs = 30

[[parallel]]
name = "Cycles autotest"
command = "cycles_autotest"

[[parallel]]
name = "Timer autotest"
command = "timer_autotest"
validator = "timing"

[[exclusive]]
name = "Ring perf autotest"
command = ["ring_perf_autotest"]
"#;

    fn write_catalog(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn run_args(argv: &[&str]) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("Expected Run command, got {:?}", other),
        }
    }

    #[test]
    fn test_load_catalog_file() {
        let file = write_catalog(CATALOG);
        let (catalog, settings) = load_catalog_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(settings.timeout_secs, Some(30));
    }

    #[test]
    fn test_demo_catalog_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("catalogs/demo.toml");
        let (catalog, settings) = load_catalog_file(&path).unwrap();
        assert_eq!(catalog.parallel().len(), 5);
        assert_eq!(catalog.exclusive().len(), 2);
        assert_eq!(settings.timeout(), Some(Duration::from_secs(10)));
        assert_eq!(catalog.get("Timer autotest").unwrap().validator.name(), "timing");
    }

    #[test]
    fn test_missing_file_is_catalog_exit_code() {
        let err = load_catalog_file(Path::new("/nonexistent/autotest.toml")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert_eq!(CliError::from(err).exit_code, ExitCode::CATALOG);
    }

    #[test]
    fn test_duplicate_names_rejected_with_exit_code_2() {
        let file = write_catalog(
            r#"
[[parallel]]
name = "Dup"
command = "a"

[[exclusive]]
name = "Dup"
command = "b"
"#,
        );
        let err = load_catalog_file(file.path()).unwrap_err();
        assert!(matches!(
            &err,
            LoadError::Catalog {
                source: CatalogError::DuplicateName { .. },
                ..
            }
        ));
        let cli_err = CliError::from(err);
        assert_eq!(cli_err.exit_code, ExitCode::CATALOG);
        assert!(cli_err.message.contains("Dup"));
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings {
            launcher: Vec::new(),
            timeout_secs: Some(30),
        };
        let config = build_config(&run_args(&["autotest", "run", "c.toml"]), &settings);
        assert_eq!(config.timeout, Duration::from_secs(30));

        let config = build_config(
            &run_args(&["autotest", "run", "c.toml", "-t", "5", "-j", "0", "-k", "ring", "--retries", "1"]),
            &settings,
        );
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.concurrency.get(), 1);
        assert_eq!(config.filter.as_deref(), Some("ring"));
        assert_eq!(config.retries, 1);
    }

    #[test]
    fn test_render_listing() {
        let file = write_catalog(CATALOG);
        let (catalog, _) = load_catalog_file(file.path()).unwrap();
        insta::assert_snapshot!(render_listing(&catalog, None).join("\n"), @r"
        [parallel]
          Cycles autotest (default): cycles_autotest
          Timer autotest (timing): timer_autotest
        [exclusive]
          Ring perf autotest (default): ring_perf_autotest
        ");
        assert_eq!(render_listing(&catalog, Some("Ring")).len(), 2);
    }
}
