//! Run configuration.
//!
//! Precedence: CLI flags over catalog `[settings]` over the defaults below.

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use autotest_core::manifest::Settings;
use autotest_core::name_matches;

/// Default per-test timeout when neither the catalog nor the CLI sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on captured bytes per output stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long to keep draining output pipes after the child has been reaped.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Phase-1 worker count (always at least 1).
    pub concurrency: NonZeroUsize,
    /// Per-test timeout unless the test case carries its own.
    pub timeout: Duration,
    /// Extra attempts for a test whose verdict is not Passed/Skipped.
    pub retries: u32,
    /// Stop dispatching after the first non-acceptable verdict.
    pub stop_on_failure: bool,
    /// Substring a test name must contain to run; others are reported as skipped.
    pub filter: Option<String>,
    pub max_output_bytes: usize,
    pub drain_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            stop_on_failure: false,
            filter: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// One worker per available execution unit.
pub fn default_concurrency() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with a catalog's `[settings]`.
    pub fn from_settings(settings: &Settings) -> Self {
        let config = Self::default();
        match settings.timeout() {
            Some(timeout) => config.with_timeout(timeout),
            None => config,
        }
    }

    /// `0` is clamped to a single worker.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::MIN);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn with_filter(mut self, filter: Option<impl Into<String>>) -> Self {
        self.filter = filter.map(Into::into).filter(|f: &String| !f.is_empty());
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Whether `name` survives the filter.
    pub fn selects(&self, name: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| name_matches(name, f))
    }
}
