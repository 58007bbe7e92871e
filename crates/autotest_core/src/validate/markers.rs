//! Default marker-matching validator.

use serde::Deserialize;

use super::{Validator, describe_exit};
use crate::outcome::Outcome;
use crate::verdict::Verdict;

pub const DEFAULT_SUCCESS_MARKER: &str = "Test OK";
pub const DEFAULT_SKIP_MARKER: &str = "Test Skipped";
pub const DEFAULT_ERROR_MARKERS: &[&str] = &["Test Failed", "Command not found"];

/// Passed iff the process exits zero, prints the success marker and prints no error marker.
///
/// A test that reports itself skipped (skip marker, exit zero) yields `Skipped`: the test binary decided the
/// feature under test is unavailable on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerValidator {
    pub success_marker: String,
    pub error_markers: Vec<String>,
    pub skip_marker: Option<String>,
}

impl Default for MarkerValidator {
    fn default() -> Self {
        Self {
            success_marker: DEFAULT_SUCCESS_MARKER.to_string(),
            error_markers: DEFAULT_ERROR_MARKERS.iter().map(|s| s.to_string()).collect(),
            skip_marker: Some(DEFAULT_SKIP_MARKER.to_string()),
        }
    }
}

impl MarkerValidator {
    pub fn with_success_marker(mut self, marker: impl Into<String>) -> Self {
        self.success_marker = marker.into();
        self
    }

    pub fn with_error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_markers.push(marker.into());
        self
    }
}

impl Validator for MarkerValidator {
    fn name(&self) -> &'static str {
        "default"
    }

    fn evaluate(&self, outcome: &Outcome) -> Verdict {
        let output = outcome.combined_output();

        if let Some(marker) = self.error_markers.iter().find(|m| output.contains(m.as_str())) {
            return Verdict::failed(format!("error marker {:?} in output", marker));
        }
        if !outcome.succeeded() {
            return Verdict::failed(describe_exit(outcome));
        }
        if let Some(skip) = &self.skip_marker {
            if output.contains(skip.as_str()) {
                return Verdict::skipped(format!("test reported {:?}", skip));
            }
        }
        if !outcome.stdout.contains(self.success_marker.as_str()) {
            return Verdict::failed(format!("success marker {:?} not found", self.success_marker));
        }
        Verdict::passed("")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::verdict::Status;

    fn exited(code: i32, stdout: &str) -> Outcome {
        Outcome::exited(code, stdout, "", Duration::from_millis(1))
    }

    #[test]
    fn ok_marker_and_zero_exit_passes() {
        let verdict = MarkerValidator::default().evaluate(&exited(0, "RTE>>cycles_autotest\nTest OK\n"));
        assert_eq!(verdict.status, Status::Passed);
    }

    #[test]
    fn nonzero_exit_with_empty_output_fails() {
        let verdict = MarkerValidator::default().evaluate(&exited(1, ""));
        assert_eq!(verdict.status, Status::Failed);
        assert!(verdict.message.contains("exit code 1"));
    }

    #[test]
    fn missing_marker_fails() {
        let verdict = MarkerValidator::default().evaluate(&exited(0, "done\n"));
        assert_eq!(verdict.status, Status::Failed);
        assert!(verdict.message.contains("Test OK"));
    }

    #[test]
    fn error_marker_wins_over_success_marker() {
        let verdict = MarkerValidator::default().evaluate(&exited(0, "Test OK\nTest Failed\n"));
        assert_eq!(verdict.status, Status::Failed);
    }

    #[test]
    fn error_marker_on_stderr_is_seen() {
        let outcome = Outcome::exited(0, "Test OK", "Command not found", Duration::ZERO);
        assert_eq!(MarkerValidator::default().evaluate(&outcome).status, Status::Failed);
    }

    #[test]
    fn skip_marker_yields_skipped() {
        let verdict = MarkerValidator::default().evaluate(&exited(0, "Test Skipped\n"));
        assert_eq!(verdict.status, Status::Skipped);
    }

    #[test]
    fn custom_success_marker() {
        let validator = MarkerValidator::default().with_success_marker("ALL GOOD");
        assert_eq!(validator.evaluate(&exited(0, "ALL GOOD")).status, Status::Passed);
        assert_eq!(validator.evaluate(&exited(0, "Test OK")).status, Status::Failed);
    }
}
