//! Terminal classification of a test run.

use std::fmt;

use serde::Serialize;

/// Terminal state of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Passed,
    Failed,
    Errored,
    Skipped,
    TimedOut,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "PASSED",
            Status::Failed => "FAILED",
            Status::Errored => "ERROR",
            Status::Skipped => "SKIPPED",
            Status::TimedOut => "TIMEOUT",
        }
    }

    /// Passed and Skipped do not fail the run.
    pub fn is_acceptable(self) -> bool {
        matches!(self, Status::Passed | Status::Skipped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infrastructure reason behind an `Errored` verdict.
///
/// Separates "the harness could not judge this test" from "the test is broken", so operators can tell a missing
/// binary apart from a real regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCause {
    /// The command could not be started.
    LaunchFailure,
    /// The validator panicked while classifying the outcome.
    ValidatorPanic,
    /// The run was aborted while the test was in flight.
    Interrupted,
    /// The output did not contain data the validator could interpret.
    Unparsable,
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultCause::LaunchFailure => "launch failure",
            FaultCause::ValidatorPanic => "validator panic",
            FaultCause::Interrupted => "interrupted",
            FaultCause::Unparsable => "unparsable output",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FaultCause>,
}

impl Verdict {
    pub fn passed(message: impl Into<String>) -> Self {
        Self::new(Status::Passed, message, None)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Status::Failed, message, None)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(Status::Skipped, message, None)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(Status::TimedOut, message, None)
    }

    pub fn errored(cause: FaultCause, message: impl Into<String>) -> Self {
        Self::new(Status::Errored, message, Some(cause))
    }

    fn new(status: Status, message: impl Into<String>, cause: Option<FaultCause>) -> Self {
        Self {
            status,
            message: message.into(),
            cause,
        }
    }

    pub fn is_acceptable(&self) -> bool {
        self.status.is_acceptable()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.cause, self.message.is_empty()) {
            (Some(cause), true) => write!(f, "{} ({})", self.status, cause),
            (Some(cause), false) => write!(f, "{} ({}): {}", self.status, cause, self.message),
            (None, true) => write!(f, "{}", self.status),
            (None, false) => write!(f, "{}: {}", self.status, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptable_statuses() {
        assert!(Status::Passed.is_acceptable());
        assert!(Status::Skipped.is_acceptable());
        assert!(!Status::Failed.is_acceptable());
        assert!(!Status::Errored.is_acceptable());
        assert!(!Status::TimedOut.is_acceptable());
    }

    #[test]
    fn display_includes_cause() {
        let verdict = Verdict::errored(FaultCause::LaunchFailure, "no such file");
        assert_eq!(verdict.to_string(), "ERROR (launch failure): no such file");
        assert_eq!(Verdict::passed("").to_string(), "PASSED");
    }
}
