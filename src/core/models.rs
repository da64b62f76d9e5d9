// src/core/models.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use url::Url;

// --- Verdicts ---

/// Tri-state outcome of one check on one host.
///
/// Stored as `1` (compliant), `0` (non-compliant) or `NULL` (not evaluated / indeterminate).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Verdict {
    Pass,
    Fail,
    #[default]
    Unknown,
}

impl Verdict {
    pub fn from_bool(ok: bool) -> Self {
        if ok { Verdict::Pass } else { Verdict::Fail }
    }

    pub fn as_db(self) -> Option<i64> {
        match self {
            Verdict::Pass => Some(1),
            Verdict::Fail => Some(0),
            Verdict::Unknown => None,
        }
    }

    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            Some(1) => Verdict::Pass,
            Some(0) => Verdict::Fail,
            _ => Verdict::Unknown,
        }
    }

    /// Label used in the per-host report files.
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Pass => "OK",
            Verdict::Fail => "NOK",
            Verdict::Unknown => "N/A",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// --- Check fields ---

/// The tri-state columns of the compliance table.
///
/// The variant order is the column order of the table. `GradeCheck` is written only by
/// the grading path, every other field only by the orchestrator's synchronous phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum CheckField {
    HttpsReachable,
    HeadersCheck,
    VersionCheck,
    RobotsCheck,
    ErrorCheck,
    SecurityTxt,
    RemnantsCheck,
    CertCheck,
    RedirectCheck,
    DebugCheck,
    GradeCheck,
}

impl CheckField {
    pub fn column(self) -> &'static str {
        self.into()
    }

    pub fn is_grading(self) -> bool {
        matches!(self, CheckField::GradeCheck)
    }
}

/// A grade counts as compliant when it is in the A range (A+, A, A-).
pub fn grade_is_compliant(grade: &str) -> bool {
    grade.contains('A')
}

// --- Partial updates ---

/// Value of a single column in a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Verdict(Verdict),
    Text(Option<String>),
}

/// A set of column writes applied atomically to one host's row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    entries: Vec<(&'static str, FieldValue)>,
}

impl FieldUpdate {
    pub const CHECK_DATE: &'static str = "check_date";
    pub const GRADE: &'static str = "grade";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn verdict(mut self, field: CheckField, verdict: Verdict) -> Self {
        self.set(field.column(), FieldValue::Verdict(verdict));
        self
    }

    pub fn check_date(mut self, date: &str) -> Self {
        self.set(Self::CHECK_DATE, FieldValue::Text(Some(date.to_string())));
        self
    }

    /// Writes the grade together with its derived `grade_check` verdict.
    /// `None` resets both to indeterminate.
    pub fn grade(mut self, grade: Option<&str>) -> Self {
        let verdict = grade.map_or(Verdict::Unknown, |g| Verdict::from_bool(grade_is_compliant(g)));
        self.set(Self::GRADE, FieldValue::Text(grade.map(str::to_string)));
        self.set(CheckField::GradeCheck.column(), FieldValue::Verdict(verdict));
        self
    }

    fn set(&mut self, column: &'static str, value: FieldValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = value;
        } else {
            self.entries.push((column, value));
        }
    }

    pub fn entries(&self) -> &[(&'static str, FieldValue)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- Persisted record ---

/// One row of the compliance table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRecord {
    pub host: String,
    pub check_date: Option<String>,
    pub verdicts: BTreeMap<CheckField, Verdict>,
    pub grade: Option<String>,
}

impl HostRecord {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            check_date: None,
            verdicts: CheckField::iter().map(|f| (f, Verdict::Unknown)).collect(),
            grade: None,
        }
    }

    pub fn verdict(&self, field: CheckField) -> Verdict {
        self.verdicts.get(&field).copied().unwrap_or_default()
    }

    /// True when no check field has been evaluated.
    pub fn is_blank(&self) -> bool {
        self.grade.is_none() && self.verdicts.values().all(|v| *v == Verdict::Unknown)
    }
}

// --- Collaborator results ---

/// What a single check reports back: its verdict and a human-readable transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub transcript: String,
}

impl CheckOutcome {
    pub fn new(verdict: Verdict, transcript: impl Into<String>) -> Self {
        Self { verdict, transcript: transcript.into() }
    }

    pub fn pass(transcript: impl Into<String>) -> Self {
        Self::new(Verdict::Pass, transcript)
    }

    pub fn fail(transcript: impl Into<String>) -> Self {
        Self::new(Verdict::Fail, transcript)
    }

    pub fn unknown(transcript: impl Into<String>) -> Self {
        Self::new(Verdict::Unknown, transcript)
    }
}

/// The host under scan plus the base URLs the HTTP checks talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub https: Url,
    pub http: Url,
}

impl Target {
    pub fn new(host: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            host: host.to_string(),
            https: Url::parse(&format!("https://{host}"))?,
            http: Url::parse(&format!("http://{host}"))?,
        })
    }

    /// Points both schemes at explicit base URLs (e.g. a local mock server).
    pub fn with_bases(host: &str, https: Url, http: Url) -> Self {
        Self { host: host.to_string(), https, http }
    }

    pub fn https_path(&self, path: &str) -> Result<Url, url::ParseError> {
        self.https.join(path)
    }
}
