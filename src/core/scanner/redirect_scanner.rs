// src/core/scanner/redirect_scanner.rs

use tracing::{info, warn};

use crate::core::models::{CheckField, CheckOutcome, Target};
use crate::core::scanner::{Check, HttpProbe, SHORT_TIMEOUT, ScanError, format_headers};
use async_trait::async_trait;

/// Plain HTTP must either be closed or redirect to HTTPS.
///
/// A host that does not answer on port 80 (refused, timed out, or an error status)
/// never serves unencrypted content and therefore passes.
pub struct RedirectCheck {
    probe: HttpProbe,
}

impl RedirectCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for RedirectCheck {
    fn field(&self) -> CheckField {
        CheckField::RedirectCheck
    }

    fn title(&self) -> &'static str {
        "Check for only accessible through HTTPS"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let http_url = target.http.clone();
        let first = match self.probe.no_redirect.get(http_url.clone()).timeout(SHORT_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                info!(host = %target.host, error = %e, "Not reachable over plain HTTP.");
                return Ok(CheckOutcome::pass(format!("HTTP Connection failed: {http_url} is not reachable over HTTP (port 80): {e}")));
            }
        };

        let status = first.status();
        if status.is_client_error() || status.is_server_error() {
            return Ok(CheckOutcome::pass(format!("HTTP error occurred: {status}")));
        }
        let mut lines = vec![
            format!("HTTP request returns response code: {status}"),
            format!("HTTP headers are:\n{}", format_headers(first.headers())),
        ];

        let followed = self.probe.client.get(http_url.clone()).timeout(SHORT_TIMEOUT).send().await.map_err(|e| {
            warn!(host = %target.host, error = %e, "Following HTTP redirects failed.");
            e
        })?;
        let final_url = followed.url().clone();
        lines.push(format!("final URL is: {final_url}"));
        if final_url.scheme() == "https" {
            lines.push(format!("{http_url} redirects HTTP to HTTPS"));
            Ok(CheckOutcome::pass(lines.join("\n")))
        } else {
            lines.push(format!("ERR {http_url} does not redirect HTTP to HTTPS"));
            Ok(CheckOutcome::fail(lines.join("\n")))
        }
    }
}
