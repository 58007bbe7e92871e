//! Concurrency-safety validator for lock tests (spinlock, rwlock, timer race conditions).

use serde::Deserialize;

use super::{Validator, describe_exit};
use crate::outcome::Outcome;
use crate::verdict::Verdict;

pub const DEFAULT_RACE_INDICATORS: &[&str] = &["race detected", "RACE", "ThreadSanitizer", "deadlock"];

/// Passed iff the process exits zero and no race indicator appears on either stream.
///
/// Lock tests repeat their critical section internally; `iteration_marker` + `min_iterations` guard against a
/// test that exits zero without actually running its iterations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaceValidator {
    pub indicators: Vec<String>,
    pub iteration_marker: Option<String>,
    pub min_iterations: usize,
}

impl Default for RaceValidator {
    fn default() -> Self {
        Self {
            indicators: DEFAULT_RACE_INDICATORS.iter().map(|s| s.to_string()).collect(),
            iteration_marker: None,
            min_iterations: 0,
        }
    }
}

impl RaceValidator {
    pub fn with_iterations(mut self, marker: impl Into<String>, min: usize) -> Self {
        self.iteration_marker = Some(marker.into());
        self.min_iterations = min;
        self
    }
}

impl Validator for RaceValidator {
    fn name(&self) -> &'static str {
        "race"
    }

    fn evaluate(&self, outcome: &Outcome) -> Verdict {
        if !outcome.succeeded() {
            return Verdict::failed(describe_exit(outcome));
        }

        let output = outcome.combined_output();
        if let Some(token) = self.indicators.iter().find(|t| output.contains(t.as_str())) {
            return Verdict::failed(format!("race indicator {:?} in output", token));
        }

        match &self.iteration_marker {
            Some(marker) => {
                let seen = output.matches(marker.as_str()).count();
                if seen < self.min_iterations {
                    Verdict::failed(format!(
                        "only {} of {} iterations reported {:?}",
                        seen, self.min_iterations, marker
                    ))
                } else {
                    Verdict::passed(format!("{} iterations", seen))
                }
            }
            None => Verdict::passed(""),
        }
    }
}
