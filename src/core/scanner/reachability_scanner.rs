// src/core/scanner/reachability_scanner.rs

use tracing::{info, warn};

use crate::core::models::{CheckField, CheckOutcome, Target};
use crate::core::scanner::{Check, HttpProbe, REQUEST_TIMEOUT, ScanError};
use async_trait::async_trait;

/// Gate check: is the host answering HTTPS at all?
///
/// Any HTTP status counts as reachable, since a 4xx or 5xx still proves a working TLS
/// connection. Only connection failures, timeouts and redirect loops fail the gate.
pub struct HttpsReachabilityCheck {
    probe: HttpProbe,
}

impl HttpsReachabilityCheck {
    pub fn new(probe: HttpProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Check for HttpsReachabilityCheck {
    fn field(&self) -> CheckField {
        CheckField::HttpsReachable
    }

    fn title(&self) -> &'static str {
        "HTTPS reachable check"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        info!(host = %target.host, "Checking HTTPS reachability.");
        match self.probe.client.get(target.https.clone()).timeout(REQUEST_TIMEOUT).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    info!(host = %target.host, %status, "Reachable over HTTPS with an error status.");
                    Ok(CheckOutcome::pass(format!("Reachable over HTTPS, but response code = {status}")))
                } else {
                    Ok(CheckOutcome::pass(format!("Response Code: {status}")))
                }
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    "Timeout: The request timed out"
                } else if e.is_redirect() {
                    "TooManyRedirects: The request exceeded the maximum number of redirections"
                } else {
                    "ConnectionError: Failed to establish a connection"
                };
                warn!(host = %target.host, error = %e, "{}", reason);
                Ok(CheckOutcome::fail(format!("{reason}, error msg:\n{e}")))
            }
        }
    }
}
