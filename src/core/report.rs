// src/core/report.rs

//! Per-host free-text report files written next to the result store.
//!
//! Reports are additive transcripts only. A report that cannot be written is logged
//! and ignored; nothing in the scan depends on it.

use crate::core::models::CheckOutcome;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct HostReport {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl HostReport {
    pub fn path_for(dir: &Path, host: &str) -> PathBuf {
        dir.join(format!("{host}.txt"))
    }

    /// Starts a fresh report for this run, replacing any earlier one.
    pub fn create(dir: &Path, host: &str, check_date: &str) -> Self {
        let path = Self::path_for(dir, host);
        let mut report = Self::from_result(path.clone(), File::create(&path));
        report.line(&format!("{host} check performed on: {check_date}"));
        report
    }

    /// Re-opens an existing report to add later sections (e.g. grading).
    pub fn append(dir: &Path, host: &str) -> Self {
        let path = Self::path_for(dir, host);
        let file = OpenOptions::new().create(true).append(true).open(&path);
        Self::from_result(path, file)
    }

    fn from_result(path: PathBuf, file: std::io::Result<File>) -> Self {
        let writer = match file {
            Ok(f) => Some(BufWriter::new(f)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not open host report.");
                None
            }
        };
        Self { path, writer }
    }

    pub fn section(&mut self, title: &str) {
        self.write(&format!("\n==========={title}\n"));
    }

    pub fn line(&mut self, text: &str) {
        self.write(text);
        if !text.ends_with('\n') {
            self.write("\n");
        }
    }

    pub fn outcome(&mut self, title: &str, outcome: &CheckOutcome) {
        self.section(title);
        self.line(outcome.verdict.label());
        if !outcome.transcript.is_empty() {
            self.line(&outcome.transcript);
        }
    }

    fn write(&mut self, text: &str) {
        let Some(writer) = self.writer.as_mut() else { return };
        if let Err(e) = writer.write_all(text.as_bytes()) {
            warn!(path = %self.path.display(), error = %e, "Writing host report failed.");
            self.writer = None;
        }
    }
}

impl Drop for HostReport {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), error = %e, "Flushing host report failed.");
            }
        }
    }
}

/// Writes a raw artifact (e.g. a grading JSON document) next to the reports.
pub fn write_artifact(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Err(e) = std::fs::write(&path, contents) {
        warn!(path = %path.display(), error = %e, "Could not write artifact.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_created_then_appended() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut report = HostReport::create(dir.path(), "good.example", "2026-10-19_09:00:00");
            report.outcome("Robots Check", &CheckOutcome::pass("Allow: /"));
        }
        {
            let mut report = HostReport::append(dir.path(), "good.example");
            report.section("Qualys SSLscan");
            report.line("OK");
        }
        let text = std::fs::read_to_string(HostReport::path_for(dir.path(), "good.example")).unwrap();
        assert!(text.starts_with("good.example check performed on: 2026-10-19_09:00:00\n"));
        assert!(text.contains("\n===========Robots Check\nOK\nAllow: /\n"));
        assert!(text.ends_with("===========Qualys SSLscan\nOK\n"));
    }

    #[test]
    fn unwritable_report_is_a_no_op() {
        let mut report = HostReport::create(Path::new("/nonexistent/dir"), "x.example", "now");
        report.line("ignored");
    }
}
