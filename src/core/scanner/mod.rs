// src/core/scanner/mod.rs

// Each sub-module is one stateless check. The orchestrator only sees them through the
// `Check` and `DnsGate` traits declared here.
pub mod dns_scanner;
pub mod error_page_scanner;
pub mod headers_scanner;
pub mod reachability_scanner;
pub mod redirect_scanner;
pub mod remnants_scanner;
pub mod robots_scanner;
pub mod ssl_scanner;
pub mod testssl_scanner;

use crate::config::RequestIdentity;
use crate::core::models::{CheckField, CheckOutcome, Target};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;

use self::error_page_scanner::ErrorPageCheck;
use self::headers_scanner::{DebugHeaderCheck, SecurityHeadersCheck, VersionLeakCheck};
use self::redirect_scanner::RedirectCheck;
use self::remnants_scanner::RemnantsCheck;
use self::robots_scanner::{RobotsCheck, SecurityTxtCheck};
use self::ssl_scanner::CertificateCheck;

/// Timeout for the ordinary check requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for the quick probes (error page, HTTP redirect).
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors a check can hit. The orchestrator turns any of them into an indeterminate verdict.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("DNS lookup failed: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("task failed: {0}")]
    Join(String),
}

/// A single stateless verdict collaborator.
#[async_trait]
pub trait Check: Send + Sync {
    /// The compliance column this check owns.
    fn field(&self) -> CheckField;

    /// Section title used in the host report.
    fn title(&self) -> &'static str;

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError>;
}

/// The DNS pre-check. `Err` means the host does not resolve and is skipped.
#[async_trait]
pub trait DnsGate: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<CheckOutcome, ScanError>;
}

/// Shared HTTP clients carrying the configured request identity.
#[derive(Clone)]
pub struct HttpProbe {
    pub client: reqwest::Client,
    pub no_redirect: reqwest::Client,
}

impl HttpProbe {
    pub fn new(identity: RequestIdentity) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .user_agent(identity.user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let no_redirect = reqwest::Client::builder()
            .user_agent(identity.user_agent())
            .timeout(REQUEST_TIMEOUT)
            .redirect(Policy::none())
            .build()?;
        Ok(Self { client, no_redirect })
    }
}

/// The verdict phase, in the fixed order the orchestrator runs it.
pub fn standard_checks(probe: &HttpProbe, remnants: Option<Arc<Vec<String>>>) -> Vec<Box<dyn Check>> {
    vec![
        Box::new(SecurityHeadersCheck::new(probe.clone())),
        Box::new(VersionLeakCheck::new(probe.clone())),
        Box::new(RobotsCheck::new(probe.clone())),
        Box::new(ErrorPageCheck::new(probe.clone())),
        Box::new(SecurityTxtCheck::new(probe.clone())),
        Box::new(RemnantsCheck::new(probe.clone(), remnants)),
        Box::new(CertificateCheck::default()),
        Box::new(RedirectCheck::new(probe.clone())),
        Box::new(DebugHeaderCheck::new(probe.clone())),
    ]
}

pub(crate) fn is_text_plain(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/plain"))
}

/// Renders headers one per line for the host report.
pub(crate) fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("[Invalid UTF-8]")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A path that should not exist on any server.
pub(crate) fn random_path() -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn checks_run_in_fixed_order() {
        let probe = HttpProbe::new(RequestIdentity::Identified).unwrap();
        let fields: Vec<CheckField> = standard_checks(&probe, None).iter().map(|c| c.field()).collect();
        assert_eq!(
            fields,
            vec![
                CheckField::HeadersCheck,
                CheckField::VersionCheck,
                CheckField::RobotsCheck,
                CheckField::ErrorCheck,
                CheckField::SecurityTxt,
                CheckField::RemnantsCheck,
                CheckField::CertCheck,
                CheckField::RedirectCheck,
                CheckField::DebugCheck,
            ]
        );
    }

    #[test]
    fn text_plain_detection_ignores_charset() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        assert!(is_text_plain(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        assert!(!is_text_plain(&headers));
    }

    #[test]
    fn random_paths_differ() {
        assert_ne!(random_path(), random_path());
        assert_eq!(random_path().len(), 16);
    }
}
