//! Validator for diagnostic "dump" commands, where success is well-formed output rather than a marker string.

use serde::Deserialize;

use super::{Validator, describe_exit};
use crate::outcome::Outcome;
use crate::verdict::Verdict;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFormat {
    /// Every non-blank line is `key: value` or `key = value`.
    #[default]
    KeyValue,
    /// The whole of stdout is one JSON document.
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DumpValidator {
    pub format: DumpFormat,
}

impl DumpValidator {
    pub fn new(format: DumpFormat) -> Self {
        Self { format }
    }
}

/// Count key/value records, or return the first malformed line.
fn parse_key_value(stdout: &str) -> Result<usize, String> {
    let mut records = 0;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let key = line
            .split_once(':')
            .or_else(|| line.split_once('='))
            .map(|(key, _)| key.trim());
        match key {
            Some(key) if !key.is_empty() => records += 1,
            _ => return Err(line.to_string()),
        }
    }
    Ok(records)
}

impl Validator for DumpValidator {
    fn name(&self) -> &'static str {
        "dump"
    }

    fn evaluate(&self, outcome: &Outcome) -> Verdict {
        if !outcome.succeeded() {
            return Verdict::failed(describe_exit(outcome));
        }

        match self.format {
            DumpFormat::KeyValue => match parse_key_value(&outcome.stdout) {
                Ok(0) => Verdict::failed("dump is empty"),
                Ok(records) => Verdict::passed(format!("{} records", records)),
                Err(line) => Verdict::failed(format!("malformed dump line {:?}", line)),
            },
            DumpFormat::Json => match serde_json::from_str::<serde_json::Value>(&outcome.stdout) {
                Ok(_) => Verdict::passed(""),
                Err(e) => Verdict::failed(format!("dump is not valid JSON: {}", e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::verdict::Status;

    fn run(validator: &DumpValidator, stdout: &str) -> Verdict {
        validator.evaluate(&Outcome::exited(0, stdout, "", Duration::ZERO))
    }

    #[test]
    fn key_value_dump_passes() {
        let stdout = "Segment 0: IOVA:0x0, len:2097152\n\nsocket_id = 0\n";
        let verdict = run(&DumpValidator::default(), stdout);
        assert_eq!(verdict.status, Status::Passed);
        assert_eq!(verdict.message, "2 records");
    }

    #[test]
    fn malformed_line_fails() {
        let verdict = run(&DumpValidator::default(), "ring <r0>@0x1000\nflags: 0\n");
        assert_eq!(verdict.status, Status::Failed);
        assert!(verdict.message.contains("ring <r0>@0x1000"));
    }

    #[test]
    fn empty_dump_fails() {
        assert_eq!(run(&DumpValidator::default(), "\n \n").status, Status::Failed);
    }

    #[test]
    fn json_dump() {
        let validator = DumpValidator::new(DumpFormat::Json);
        assert_eq!(run(&validator, r#"{"heaps": [1, 2]}"#).status, Status::Passed);
        assert_eq!(run(&validator, "{heaps").status, Status::Failed);
    }

    #[test]
    fn failing_exit_fails() {
        let verdict = DumpValidator::default().evaluate(&Outcome::exited(1, "a: b", "", Duration::ZERO));
        assert_eq!(verdict.status, Status::Failed);
    }
}
