//! TOML catalog manifests.
//!
//! ```toml
//! [settings]
//! launcher = ["./build/app/test"]
//! timeout_secs = 30
//!
//! [[parallel]]
//! name = "Timer autotest"
//! command = "timer_autotest"
//! validator = { kind = "timing", max_jitter = 0.5 }
//!
//! [[exclusive]]
//! name = "Ring performance autotest"
//! command = ["ring_perf_autotest"]
//! ```
//!
//! The validator of each entry is a closed enum: deserializing the manifest selects a concrete validator family,
//! and an absent `validator` selects the default marker validator. Nothing is looked up by name once the catalog
//! exists.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{Catalog, CatalogBuilder, CatalogError, CommandSpec, Phase, TestCase};
use crate::validate::{DumpValidator, MarkerValidator, RaceValidator, TimingValidator, ValidatorRef};

/// Top-level manifest document.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub parallel: Vec<Entry>,
    #[serde(default)]
    pub exclusive: Vec<Entry>,
}

/// Catalog-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Prepended to every command.
    #[serde(default)]
    pub launcher: Vec<String>,
    /// Default per-test timeout, overridable by the CLI.
    pub timeout_secs: Option<u64>,
}

impl Settings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    pub name: String,
    pub command: CommandEntry,
    #[serde(default)]
    pub validator: Option<ValidatorEntry>,
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// `command = "prog arg"` or `command = ["prog", "arg"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CommandEntry {
    Line(String),
    Argv(Vec<String>),
}

impl CommandEntry {
    fn to_spec(&self) -> Option<CommandSpec> {
        match self {
            CommandEntry::Line(line) => CommandSpec::parse(line),
            CommandEntry::Argv(argv) => CommandSpec::from_argv(argv.iter().cloned()),
        }
    }
}

/// Validator selection: a bare family name or a table with a `kind` tag and that family's options.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ValidatorEntry {
    Family(Family),
    Configured(ValidatorConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Default,
    Timing,
    Dump,
    Race,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorConfig {
    Default(MarkerValidator),
    Timing(TimingValidator),
    Dump(DumpValidator),
    Race(RaceValidator),
}

impl ValidatorEntry {
    fn into_validator(self, name: &str) -> Result<ValidatorRef, CatalogError> {
        let validator: ValidatorRef = match self {
            ValidatorEntry::Family(Family::Default) => Arc::new(MarkerValidator::default()),
            ValidatorEntry::Family(Family::Timing) => Arc::new(TimingValidator::default()),
            ValidatorEntry::Family(Family::Dump) => Arc::new(DumpValidator::default()),
            ValidatorEntry::Family(Family::Race) => Arc::new(RaceValidator::default()),
            ValidatorEntry::Configured(ValidatorConfig::Default(v)) => {
                if v.success_marker.is_empty() {
                    return Err(CatalogError::InvalidValidator {
                        name: name.to_string(),
                        reason: "success_marker must not be empty".to_string(),
                    });
                }
                Arc::new(v)
            }
            ValidatorEntry::Configured(ValidatorConfig::Timing(v)) => {
                if v.sample_prefix.is_empty() {
                    return Err(CatalogError::InvalidValidator {
                        name: name.to_string(),
                        reason: "sample_prefix must not be empty".to_string(),
                    });
                }
                if v.max_jitter.is_some_and(|j| j.is_nan() || j < 0.0) {
                    return Err(CatalogError::InvalidValidator {
                        name: name.to_string(),
                        reason: "max_jitter must be a non-negative number".to_string(),
                    });
                }
                Arc::new(v)
            }
            ValidatorEntry::Configured(ValidatorConfig::Dump(v)) => Arc::new(v),
            ValidatorEntry::Configured(ValidatorConfig::Race(v)) => Arc::new(v),
        };
        Ok(validator)
    }
}

impl Manifest {
    pub fn from_toml_str(source: &str) -> Result<Self, CatalogError> {
        toml::from_str(source).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Resolve every entry into a validated [`Catalog`].
    pub fn into_catalog(self) -> Result<Catalog, CatalogError> {
        let Manifest {
            settings,
            parallel,
            exclusive,
        } = self;
        if settings.timeout_secs == Some(0) {
            return Err(CatalogError::ZeroTimeout {
                scope: "[settings]".to_string(),
            });
        }

        let mut builder = CatalogBuilder::new();
        for (phase, entries) in [(Phase::Parallel, parallel), (Phase::Exclusive, exclusive)] {
            for entry in entries {
                builder = builder.push(entry.into_case(phase, &settings)?);
            }
        }
        builder.build()
    }
}

impl Entry {
    fn into_case(self, phase: Phase, settings: &Settings) -> Result<TestCase, CatalogError> {
        if self.timeout_secs == Some(0) {
            return Err(CatalogError::ZeroTimeout {
                scope: format!("test {:?}", self.name),
            });
        }
        let Some(mut command) = self.command.to_spec() else {
            return Err(CatalogError::EmptyCommand { name: self.name });
        };
        command = command.with_launcher(&settings.launcher);
        for (key, value) in self.env {
            command = command.with_env(key, value);
        }
        if let Some(cwd) = self.cwd {
            command = command.with_cwd(cwd);
        }

        let validator = match self.validator {
            Some(entry) => entry.into_validator(&self.name)?,
            None => Arc::new(MarkerValidator::default()),
        };

        Ok(TestCase {
            name: self.name,
            command,
            validator,
            report: self.report,
            phase,
            timeout: self.timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Parse a manifest and build its catalog in one step.
///
/// Returns the catalog-wide settings alongside, since the run configuration consumes them.
pub fn load_catalog(source: &str) -> Result<(Catalog, Settings), CatalogError> {
    let manifest = Manifest::from_toml_str(source)?;
    let settings = manifest.settings.clone();
    let catalog = manifest.into_catalog()?;
    tracing::debug!(
        parallel = catalog.parallel().len(),
        exclusive = catalog.exclusive().len(),
        "catalog loaded"
    );
    Ok((catalog, settings))
}
