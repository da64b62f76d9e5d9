// src/core/scanner/error_page_scanner.rs

use tracing::{debug, info};

use crate::core::models::{CheckField, CheckOutcome, Target};
use crate::core::scanner::{Check, HttpProbe, SHORT_TIMEOUT, ScanError, random_path};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

/// A product fingerprint that should never show up on a production error page.
struct Leak {
    kind: &'static str,
    pattern: &'static Lazy<Regex>,
}

static RE_DATABASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(Oracle|MySQL|SQL Server|PostgreSQL)").unwrap());
static RE_SERVER_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(Apache|nginx|Php)\b").unwrap());
static RE_VERSION_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\.\b").unwrap());

static LEAKS: &[Leak] = &[
    Leak { kind: "database", pattern: &RE_DATABASE },
    Leak { kind: "server product", pattern: &RE_SERVER_WORD },
    Leak { kind: "version number", pattern: &RE_VERSION_NUMBER },
];

/// Visible text of an HTML document, tags stripped.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Fails when the error page text mentions a database, a server product or a version.
pub fn analyze_error_page(html: &str) -> CheckOutcome {
    let text = visible_text(html);
    for leak in LEAKS {
        let found: Vec<&str> = leak.pattern.find_iter(&text).map(|m| m.as_str()).collect();
        if !found.is_empty() {
            debug!(kind = leak.kind, ?found, "Error page leaks product information.");
            return CheckOutcome::fail(format!("error page mentions {}: {}", leak.kind, found.join(", ")));
        }
    }
    CheckOutcome::pass("error page reveals no product information")
}

/// Requests a page that cannot exist and inspects the resulting error page.
pub struct ErrorPageCheck {
    probe: HttpProbe,
}

impl ErrorPageCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for ErrorPageCheck {
    fn field(&self) -> CheckField {
        CheckField::ErrorCheck
    }

    fn title(&self) -> &'static str {
        "Error Check"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let url = target.https_path(&random_path())?;
        info!(host = %target.host, url = %url, "Requesting error page.");
        let response = self.probe.client.get(url).timeout(SHORT_TIMEOUT).send().await?;
        let body = response.text().await?;
        debug!(bytes = %body.len(), "Read error page body.");
        Ok(analyze_error_page(&body))
    }
}
