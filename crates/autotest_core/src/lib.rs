//! Provide the pure data model shared by the autotest orchestrator: the test catalog, captured process outcomes,
//! verdicts, and the validator families that turn one into the other.
//!
//! ## Notes
//!
//! - This is a "semantic core" crate: **no IO**, no process spawning, no async runtime. Catalog manifests are parsed
//!   from strings; reading files is the caller's job.
//! - Everything here is deterministic. For a fixed [`Outcome`] a validator always yields the same [`Verdict`].

pub mod catalog;
pub mod manifest;
pub mod outcome;
pub mod validate;
pub mod verdict;

pub use catalog::{Catalog, CatalogBuilder, CatalogError, CommandSpec, Phase, Selection, TestCase, name_matches};
pub use outcome::{Outcome, Termination};
pub use validate::{
    DumpFormat, DumpValidator, MarkerValidator, RaceValidator, TimingValidator, Validator, ValidatorRef,
    evaluate_guarded,
};
pub use verdict::{FaultCause, Status, Verdict};
