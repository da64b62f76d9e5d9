// src/core/scanner/robots_scanner.rs

//! Policy files served from well-known locations: `robots.txt` and `security.txt`.

use tracing::{debug, info};

use crate::core::models::{CheckField, CheckOutcome, Target};
use crate::core::scanner::{Check, HttpProbe, REQUEST_TIMEOUT, ScanError, format_headers, is_text_plain};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_ALLOW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Allow:").unwrap());
static RE_DISALLOW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Disallow:").unwrap());
static RE_DISALLOW_ALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Disallow: /$").unwrap());

/// Disallow lines hand attackers a list of interesting paths, so a compliant
/// robots.txt either only allows, or disallows everything.
pub fn robots_policy_ok(body: &str) -> bool {
    let (mut allow, mut disallow, mut disallow_all) = (0, 0, 0);
    for line in body.lines().map(str::trim_end) {
        if RE_ALLOW.is_match(line) {
            allow += 1;
        } else if RE_DISALLOW_ALL.is_match(line) {
            disallow_all += 1;
        } else if RE_DISALLOW.is_match(line) {
            disallow += 1;
        }
    }
    debug!(allow, disallow, disallow_all, "Counted robots.txt directives.");
    disallow == 0 && (allow > 0 || disallow_all > 0)
}

pub struct RobotsCheck {
    probe: HttpProbe,
}

impl RobotsCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for RobotsCheck {
    fn field(&self) -> CheckField {
        CheckField::RobotsCheck
    }

    fn title(&self) -> &'static str {
        "Robots Check"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let url = target.https_path("robots.txt")?;
        info!(host = %target.host, "Fetching robots.txt.");
        let response = self.probe.client.get(url).timeout(REQUEST_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() || !is_text_plain(response.headers()) {
            return Ok(CheckOutcome::fail(format!(
                "Error: Could not retrieve a text/plain robots.txt file (HTTP {status})"
            )));
        }
        let body = response.text().await?;
        if robots_policy_ok(&body) {
            Ok(CheckOutcome::pass(body))
        } else {
            Ok(CheckOutcome::fail(body))
        }
    }
}

/// Coordinated vulnerability disclosure needs a contact file at a fixed location.
pub struct SecurityTxtCheck {
    probe: HttpProbe,
}

impl SecurityTxtCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for SecurityTxtCheck {
    fn field(&self) -> CheckField {
        CheckField::SecurityTxt
    }

    fn title(&self) -> &'static str {
        "Security.txt Check"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let url = target.https_path(".well-known/security.txt")?;
        let response = self.probe.client.get(url).timeout(REQUEST_TIMEOUT).send().await?;
        let status = response.status();
        if status.is_success() && is_text_plain(response.headers()) {
            Ok(CheckOutcome::pass(response.text().await?))
        } else {
            Ok(CheckOutcome::fail(format!(
                "HTTP response code: {status}\n{}",
                format_headers(response.headers())
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestIdentity;
    use crate::core::models::Verdict;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn allow_only_passes() {
        assert!(robots_policy_ok("User-agent: *\nAllow: /\n"));
    }

    #[test]
    fn disallow_everything_passes() {
        assert!(robots_policy_ok("User-agent: *\r\nDisallow: /\r\n"));
    }

    #[test]
    fn specific_disallow_fails() {
        assert!(!robots_policy_ok("User-agent: *\nDisallow: /admin\nAllow: /\n"));
        assert!(!robots_policy_ok("User-agent: *\nDisallow: /\nDisallow: /private\n"));
    }

    #[test]
    fn empty_file_fails() {
        assert!(!robots_policy_ok("User-agent: *\n"));
    }

    async fn mock_target() -> (MockServer, Target) {
        let server = MockServer::start().await;
        let base = Url::parse(&server.uri()).unwrap();
        let target = Target::with_bases("mock.example", base.clone(), base);
        (server, target)
    }

    #[tokio::test]
    async fn robots_served_as_html_fails() {
        let (server, target) = mock_target().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("Allow: /", "text/html"))
            .mount(&server)
            .await;
        let check = RobotsCheck::new(HttpProbe::new(RequestIdentity::Identified).unwrap());
        assert_eq!(check.run(&target).await.unwrap().verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn security_txt_present_passes() {
        let (server, target) = mock_target().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/security.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("Contact: mailto:cert@example.org", "text/plain"))
            .mount(&server)
            .await;
        let check = SecurityTxtCheck::new(HttpProbe::new(RequestIdentity::Identified).unwrap());
        let outcome = check.run(&target).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert!(outcome.transcript.contains("Contact:"));
    }

    #[tokio::test]
    async fn security_txt_missing_fails() {
        let (_server, target) = mock_target().await;
        let check = SecurityTxtCheck::new(HttpProbe::new(RequestIdentity::Identified).unwrap());
        let outcome = check.run(&target).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert!(outcome.transcript.contains("404"));
    }
}
