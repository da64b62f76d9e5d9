// src/core/scanner/headers_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::{CheckField, CheckOutcome, Target, Verdict};
use crate::core::scanner::{Check, HttpProbe, REQUEST_TIMEOUT, ScanError, format_headers};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, STRICT_TRANSPORT_SECURITY};

/// Security headers every site must send.
pub const REQUIRED_HEADERS: &[&str] = &[
    "X-XSS-Protection",
    "X-Frame-Options",
    "X-Content-Type-Options",
    "Strict-Transport-Security",
    "Referrer-Policy",
];

/// Minimum HSTS `max-age`: one year.
pub const HSTS_MIN_AGE_SECS: u64 = 31_536_000;

/// Headers that tend to carry product versions.
pub const VERSION_HEADERS: &[&str] = &[
    "server",
    "x-generator",
    "x-powered-by",
    "via",
    "x-aspnet-version",
    "x-aspnetmvc-version",
    "x-drupal-cache",
    "x-joomla-version",
    "x-wordpress",
    "x-engine",
];

/// Reads a header as text, tolerating non-UTF-8 values.
fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).map(|value| match value.to_str() {
        Ok(s) => s,
        Err(_) => {
            warn!(header_name = name, "Header found but contained invalid UTF-8.");
            "[Invalid UTF-8]"
        }
    })
}

/// Parses `max-age` from the first Strict-Transport-Security header.
///
/// Only the first occurrence is honoured (RFC 6797 §8.1).
pub fn hsts_max_age(headers: &HeaderMap) -> Option<u64> {
    let mut values = headers.get_all(STRICT_TRANSPORT_SECURITY).iter();
    let first = values.next()?.to_str().ok()?;
    if values.next().is_some() {
        warn!("More than one Strict-Transport-Security header present.");
    }
    first
        .split(';')
        .map(str::trim)
        .find(|part| part.to_ascii_lowercase().starts_with("max-age"))
        .and_then(|part| part.split('=').nth(1))
        .and_then(|v| v.trim().trim_matches('"').parse().ok())
}

pub fn analyze_security_headers(host: &str, headers: &HeaderMap) -> CheckOutcome {
    let mut lines = Vec::new();
    let mut missing = Vec::new();
    for name in REQUIRED_HEADERS {
        let present = headers.contains_key(*name);
        debug!(header_name = name, present, "Checked header presence.");
        lines.push(format!("checking presence of: {name} {}", if present { "PRESENT" } else { "NOT PRESENT" }));
        if !present {
            missing.push(*name);
        }
    }

    let mut ok = missing.is_empty();
    if !ok {
        lines.push(format!("ERR Missing headers for {host}: {}", missing.join(", ")));
    }

    match hsts_max_age(headers) {
        Some(age) if age >= HSTS_MIN_AGE_SECS => {
            lines.push(format!("OK, {host} has HSTS value of at least one year: {} days", age / 86_400));
        }
        Some(age) => {
            lines.push(format!("ERR, {host} HSTS value is LESS than one year: {} days", age / 86_400));
            ok = false;
        }
        None => {
            lines.push(format!("ERR {host} is missing a usable Strict-Transport-Security max-age"));
            ok = false;
        }
    }

    lines.push(format_headers(headers));
    CheckOutcome::new(Verdict::from_bool(ok), lines.join("\n"))
}

pub fn analyze_version_headers(headers: &HeaderMap) -> CheckOutcome {
    let leaks: Vec<String> = VERSION_HEADERS
        .iter()
        .filter_map(|name| header_text(headers, name).map(|value| (name, value)))
        .filter(|(_, value)| value.chars().any(|c| c.is_ascii_digit()))
        .map(|(name, value)| format!("Might be version info: {name}: {value}"))
        .collect();
    if leaks.is_empty() {
        CheckOutcome::pass("no version information in response headers")
    } else {
        CheckOutcome::fail(leaks.join("\n"))
    }
}

pub fn analyze_debug_headers(headers: &HeaderMap) -> CheckOutcome {
    for (name, value) in headers {
        let value = value.to_str().unwrap_or_default();
        if name.as_str().to_lowercase().contains("debug") || value.to_lowercase().contains("debug") {
            return CheckOutcome::fail(format!("'debug' found in {name} header"));
        }
    }
    CheckOutcome::pass("debug not found in HTTP headers")
}

// --- Checks ---

pub struct SecurityHeadersCheck {
    probe: HttpProbe,
}

impl SecurityHeadersCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for SecurityHeadersCheck {
    fn field(&self) -> CheckField {
        CheckField::HeadersCheck
    }

    fn title(&self) -> &'static str {
        "HTTP Headers Check"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        info!(host = %target.host, "Starting headers check.");
        let response = self.probe.client.get(target.https.clone()).timeout(REQUEST_TIMEOUT).send().await?;
        let outcome = analyze_security_headers(&target.host, response.headers());
        info!(host = %target.host, verdict = %outcome.verdict, "Headers check finished.");
        Ok(outcome)
    }
}

pub struct VersionLeakCheck {
    probe: HttpProbe,
}

impl VersionLeakCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for VersionLeakCheck {
    fn field(&self) -> CheckField {
        CheckField::VersionCheck
    }

    fn title(&self) -> &'static str {
        "Version Info CHECK"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let response = self.probe.client.head(target.https.clone()).timeout(REQUEST_TIMEOUT).send().await?;
        Ok(analyze_version_headers(response.headers()))
    }
}

pub struct DebugHeaderCheck {
    probe: HttpProbe,
}

impl DebugHeaderCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for DebugHeaderCheck {
    fn field(&self) -> CheckField {
        CheckField::DebugCheck
    }

    fn title(&self) -> &'static str {
        "Check for the word \"debug\" in HTTP header info"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let response = self.probe.client.get(target.https.clone()).timeout(REQUEST_TIMEOUT).send().await?;
        Ok(analyze_debug_headers(response.headers()))
    }
}
