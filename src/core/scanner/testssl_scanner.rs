// src/core/scanner/testssl_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::{CheckOutcome, Verdict, grade_is_compliant};
use crate::core::scanner::ScanError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_TESTSSL_PATH: &str = "/usr/local/bin/testssl.sh";

static RE_OVERALL_GRADE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Overall\s+Grade\s+([A-F][+-]?|-)").unwrap());

/// A grade computed on this machine by testssl.sh instead of the external service.
#[derive(Debug, Clone)]
pub struct LocalGrade {
    pub grade: Option<String>,
    pub outcome: CheckOutcome,
}

pub fn parse_overall_grade(output: &str) -> Option<String> {
    RE_OVERALL_GRADE.captures(output).map(|caps| caps[1].to_string())
}

pub struct LocalGrader {
    path: PathBuf,
    timeout: Duration,
}

impl LocalGrader {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { path: path.into(), timeout }
    }

    pub async fn grade(&self, host: &str) -> Result<LocalGrade, ScanError> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Skipping testssl.sh grading, binary not found.");
            return Ok(LocalGrade {
                grade: None,
                outcome: CheckOutcome::unknown(format!("testssl.sh not found at {}", self.path.display())),
            });
        }

        info!(host, "Running testssl.sh.");
        let run = Command::new(&self.path).args(["--color", "0", host]).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ScanError::Timeout(self.timeout))??;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            warn!(host, status = %output.status, "testssl.sh exited unsuccessfully.");
        }

        let grade = parse_overall_grade(&stdout);
        debug!(host, ?grade, "Parsed testssl.sh grade.");
        let outcome = match &grade {
            Some(g) => CheckOutcome::new(Verdict::from_bool(grade_is_compliant(g)), stdout),
            None => CheckOutcome::unknown(stdout),
        };
        Ok(LocalGrade { grade, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overall_grade_line() {
        let output = " Rating (experimental)\n\n Overall Grade                A+\n Grade cap reasons            none\n";
        assert_eq!(parse_overall_grade(output).as_deref(), Some("A+"));
        assert_eq!(parse_overall_grade(" Overall Grade    B\n").as_deref(), Some("B"));
        assert_eq!(parse_overall_grade("no rating"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_indeterminate() {
        let grader = LocalGrader::new("/nonexistent/testssl.sh", Duration::from_secs(1));
        let graded = grader.grade("good.example").await.unwrap();
        assert_eq!(graded.grade, None);
        assert_eq!(graded.outcome.verdict, Verdict::Unknown);
    }
}
