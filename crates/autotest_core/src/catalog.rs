//! Immutable test catalog partitioned into two ordered phases.
//!
//! ## Ordering contract
//!
//! Order within a phase is authoritative. Entries may rely on every earlier entry having completed (a catalog can
//! place a resource-hungry test last on purpose), so nothing downstream is allowed to permute a phase list. The
//! catalog only exposes read-only, order-preserving views.
//!
//! ## Phases
//!
//! - [`Phase::Parallel`]: safe to run concurrently with siblings.
//! - [`Phase::Exclusive`]: must run alone, after every parallel test has finished.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::{MarkerValidator, ValidatorRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parallel,
    Exclusive,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Parallel, Phase::Exclusive];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Parallel => "parallel",
            Phase::Exclusive => "exclusive",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building a catalog. All of them are fatal: no test runs.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum CatalogError {
    #[error("duplicate test name {name:?} ({first} and {second} phase)")]
    #[diagnostic(code(autotest::catalog::duplicate), help("test names must be unique across both phases"))]
    DuplicateName { name: String, first: Phase, second: Phase },

    #[error("{phase} entry #{index} has an empty name")]
    #[diagnostic(code(autotest::catalog::empty_name))]
    EmptyName { phase: Phase, index: usize },

    #[error("test {name:?} has an empty command")]
    #[diagnostic(
        code(autotest::catalog::empty_command),
        help("`command` must name a program, either as a string or an array")
    )]
    EmptyCommand { name: String },

    #[error("test {name:?} has an invalid validator: {reason}")]
    #[diagnostic(code(autotest::catalog::validator))]
    InvalidValidator { name: String, reason: String },

    #[error("{scope} sets timeout_secs = 0")]
    #[diagnostic(code(autotest::catalog::timeout), help("a timeout must be at least one second"))]
    ZeroTimeout { scope: String },

    #[error("failed to parse catalog: {0}")]
    #[diagnostic(code(autotest::catalog::parse))]
    Parse(String),
}

/// An argv-style invocation: program plus arguments, optional environment and working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// `None` if `program` is blank.
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Option<Self> {
        let program = program.into();
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            cwd: None,
        })
    }

    /// Build from a full argv; `None` if it is empty.
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<String>>) -> Option<Self> {
        let mut argv = argv.into_iter().map(Into::into);
        let program: String = argv.next()?;
        Self::new(program, argv)
    }

    /// Split a command line on whitespace. No shell quoting is interpreted.
    pub fn parse(line: &str) -> Option<Self> {
        Self::from_argv(line.split_whitespace())
    }

    /// Run through `/bin/sh -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.into()],
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Prepend a launcher argv, e.g. the test binary every catalog command is fed to.
    pub fn with_launcher(self, launcher: &[String]) -> Self {
        let Some((program, rest)) = launcher.split_first() else {
            return self;
        };
        let mut args: Vec<String> = rest.to_vec();
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: program.clone(),
            args,
            env: self.env,
            cwd: self.cwd,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A named external test invocation plus its validator and phase tag.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub command: CommandSpec,
    pub validator: ValidatorRef,
    /// Where the captured output of this test is saved, if anywhere.
    pub report: Option<PathBuf>,
    pub phase: Phase,
    /// Overrides the run-level timeout.
    pub timeout: Option<Duration>,
}

impl TestCase {
    /// New case with the default marker validator.
    pub fn new(name: impl Into<String>, command: CommandSpec, phase: Phase) -> Self {
        Self {
            name: name.into(),
            command,
            validator: Arc::new(MarkerValidator::default()),
            report: None,
            phase,
            timeout: None,
        }
    }

    pub fn parallel(name: impl Into<String>, command: CommandSpec) -> Self {
        Self::new(name, command, Phase::Parallel)
    }

    pub fn exclusive(name: impl Into<String>, command: CommandSpec) -> Self {
        Self::new(name, command, Phase::Exclusive)
    }

    pub fn with_validator(mut self, validator: ValidatorRef) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.report = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Collects cases and validates them into a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    parallel: Vec<TestCase>,
    exclusive: Vec<TestCase>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the list matching `case.phase`.
    pub fn push(mut self, case: TestCase) -> Self {
        match case.phase {
            Phase::Parallel => self.parallel.push(case),
            Phase::Exclusive => self.exclusive.push(case),
        }
        self
    }

    pub fn parallel(self, name: impl Into<String>, command: CommandSpec) -> Self {
        self.push(TestCase::parallel(name, command))
    }

    pub fn exclusive(self, name: impl Into<String>, command: CommandSpec) -> Self {
        self.push(TestCase::exclusive(name, command))
    }

    pub fn build(self) -> Result<Catalog, CatalogError> {
        let mut seen: HashMap<&str, Phase> = HashMap::new();

        for phase in Phase::ALL {
            let list = match phase {
                Phase::Parallel => &self.parallel,
                Phase::Exclusive => &self.exclusive,
            };
            for (index, case) in list.iter().enumerate() {
                if case.name.trim().is_empty() {
                    return Err(CatalogError::EmptyName { phase, index });
                }
                if case.command.program().trim().is_empty() {
                    return Err(CatalogError::EmptyCommand {
                        name: case.name.clone(),
                    });
                }
                if let Some(first) = seen.insert(case.name.as_str(), phase) {
                    return Err(CatalogError::DuplicateName {
                        name: case.name.clone(),
                        first,
                        second: phase,
                    });
                }
            }
        }

        Ok(Catalog {
            parallel: self.parallel.into_iter().map(Arc::new).collect(),
            exclusive: self.exclusive.into_iter().map(Arc::new).collect(),
        })
    }
}

/// Whether `name` is selected by a substring `pattern`. An empty pattern selects everything.
pub fn name_matches(name: &str, pattern: &str) -> bool {
    pattern.is_empty() || name.contains(pattern)
}

/// A catalog split by a name filter. Both lists keep phase-then-catalog order.
#[derive(Debug, Clone, Default)]
pub struct Selection<'a> {
    pub selected: Vec<&'a Arc<TestCase>>,
    pub deselected: Vec<&'a Arc<TestCase>>,
}

impl<'a> Selection<'a> {
    pub fn selected_names(&self) -> Vec<&'a str> {
        self.selected.iter().map(|case| case.name.as_str()).collect()
    }

    pub fn deselected_names(&self) -> Vec<&'a str> {
        self.deselected.iter().map(|case| case.name.as_str()).collect()
    }
}

/// Validated, read-only catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    parallel: Vec<Arc<TestCase>>,
    exclusive: Vec<Arc<TestCase>>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    pub fn parallel(&self) -> &[Arc<TestCase>] {
        &self.parallel
    }

    pub fn exclusive(&self) -> &[Arc<TestCase>] {
        &self.exclusive
    }

    pub fn phase(&self, phase: Phase) -> &[Arc<TestCase>] {
        match phase {
            Phase::Parallel => &self.parallel,
            Phase::Exclusive => &self.exclusive,
        }
    }

    /// All cases, parallel phase first, each phase in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TestCase>> {
        self.parallel.iter().chain(self.exclusive.iter())
    }

    pub fn len(&self) -> usize {
        self.parallel.len() + self.exclusive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TestCase>> {
        self.iter().find(|case| case.name == name)
    }

    /// Partition every case by [`name_matches`].
    pub fn filtered(&self, pattern: &str) -> Selection<'_> {
        let (selected, deselected) = self.iter().partition(|case| name_matches(&case.name, pattern));
        Selection { selected, deselected }
    }
}
