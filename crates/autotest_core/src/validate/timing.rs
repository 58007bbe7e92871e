//! Timing-threshold validator for timer style tests.
//!
//! The test binary prints one sample per line, e.g. `sample: 1000.25`. Samples are expected to grow monotonically
//! (they are timestamps or cumulative cycle counts) and, optionally, to be evenly spaced within `max_jitter`.

use serde::Deserialize;

use super::{Validator, describe_exit};
use crate::outcome::Outcome;
use crate::verdict::{FaultCause, Verdict};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingValidator {
    pub sample_prefix: String,
    pub min_samples: usize,
    pub monotonic: bool,
    /// Largest allowed deviation of any interval from the mean interval.
    pub max_jitter: Option<f64>,
}

impl Default for TimingValidator {
    fn default() -> Self {
        Self {
            sample_prefix: "sample:".to_string(),
            min_samples: 2,
            monotonic: true,
            max_jitter: None,
        }
    }
}

impl TimingValidator {
    pub fn with_max_jitter(mut self, jitter: f64) -> Self {
        self.max_jitter = Some(jitter);
        self
    }

    pub fn with_min_samples(mut self, min: usize) -> Self {
        self.min_samples = min;
        self
    }

    /// Extract samples from stdout; `Err` carries the offending line.
    fn samples(&self, stdout: &str) -> Result<Vec<f64>, String> {
        stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(self.sample_prefix.as_str()))
            .map(|raw| {
                let raw = raw.trim();
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| raw.to_string())
            })
            .collect()
    }
}

impl Validator for TimingValidator {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn evaluate(&self, outcome: &Outcome) -> Verdict {
        if !outcome.succeeded() {
            return Verdict::failed(describe_exit(outcome));
        }

        let samples = match self.samples(&outcome.stdout) {
            Ok(samples) => samples,
            Err(bad) => {
                return Verdict::errored(FaultCause::Unparsable, format!("unparsable timing sample {:?}", bad));
            }
        };
        if samples.len() < self.min_samples {
            return Verdict::errored(
                FaultCause::Unparsable,
                format!(
                    "expected at least {} timing samples, found {}",
                    self.min_samples,
                    samples.len()
                ),
            );
        }

        let deltas: Vec<f64> = samples.windows(2).map(|w| w[1] - w[0]).collect();

        if self.monotonic {
            if let Some((i, delta)) = deltas.iter().enumerate().find(|(_, d)| **d < 0.0) {
                return Verdict::failed(format!(
                    "timing sample {} went backwards by {}",
                    i + 1,
                    delta.abs()
                ));
            }
        }

        if let (Some(max_jitter), false) = (self.max_jitter, deltas.is_empty()) {
            let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
            let worst = deltas.iter().map(|d| (d - mean).abs()).fold(0.0_f64, f64::max);
            if worst > max_jitter {
                return Verdict::failed(format!("jitter {:.3} exceeds limit {:.3}", worst, max_jitter));
            }
        }

        Verdict::passed(format!("{} samples", samples.len()))
    }
}
