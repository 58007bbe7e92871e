//! Validators: pure classifiers from [`Outcome`] to [`Verdict`].
//!
//! Each test case carries exactly one validator, chosen while the catalog is built. A case that names no validator
//! gets [`MarkerValidator::default()`]; there is no "unset" state at run time.
//!
//! ## Families
//!
//! - [`MarkerValidator`]: exit code zero plus a success marker, no error marker (the common case).
//! - [`TimingValidator`]: numeric timing samples checked for monotonicity and bounded jitter.
//! - [`DumpValidator`]: success means the output is a well-formed structured dump.
//! - [`RaceValidator`]: no race-indicator token across the iterations a lock test performs.

mod dump;
mod markers;
mod race;
mod timing;

use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub use dump::{DumpFormat, DumpValidator};
pub use markers::MarkerValidator;
pub use race::RaceValidator;
pub use timing::TimingValidator;

use crate::outcome::Outcome;
use crate::verdict::{FaultCause, Verdict};

/// Classify a captured process outcome.
///
/// Implementations must be free of side effects apart from logging.
pub trait Validator: Send + Sync + Debug {
    /// Short family name used in listings and logs.
    fn name(&self) -> &'static str;

    fn evaluate(&self, outcome: &Outcome) -> Verdict;
}

/// Shared handle stored on every test case.
pub type ValidatorRef = Arc<dyn Validator>;

/// Run a validator, converting a panic into `Errored(ValidatorPanic)`.
///
/// A validator that crashes is an infrastructure fault, not a test failure.
pub fn evaluate_guarded(validator: &dyn Validator, outcome: &Outcome) -> Verdict {
    match panic::catch_unwind(AssertUnwindSafe(|| validator.evaluate(outcome))) {
        Ok(verdict) => verdict,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(validator = validator.name(), %detail, "validator panicked");
            Verdict::errored(
                FaultCause::ValidatorPanic,
                format!("{} validator panicked: {}", validator.name(), detail),
            )
        }
    }
}

/// Describe a non-zero or abnormal exit for failure messages.
pub(crate) fn describe_exit(outcome: &Outcome) -> String {
    match outcome.exit_code() {
        Some(code) => format!("exit code {}", code),
        None => format!("{:?}", outcome.termination),
    }
}
