// src/core/scanner/remnants_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::{CheckField, CheckOutcome, Target};
use crate::core::scanner::{Check, HttpProbe, REQUEST_TIMEOUT, ScanError, random_path};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;

/// Looks for installer files a CMS setup left behind in the web root.
pub struct RemnantsCheck {
    probe: HttpProbe,
    filenames: Option<Arc<Vec<String>>>,
}

impl RemnantsCheck {
    pub fn new(probe: HttpProbe, filenames: Option<Arc<Vec<String>>>) -> Self {
        Self { probe, filenames }
    }

    async fn answers_ok(&self, target: &Target, file: &str) -> Result<bool, ScanError> {
        let url = target.https_path(file)?;
        let response = self.probe.client.get(url).timeout(REQUEST_TIMEOUT).send().await?;
        Ok(response.status() == StatusCode::OK)
    }
}

#[async_trait]
impl Check for RemnantsCheck {
    fn field(&self) -> CheckField {
        CheckField::RemnantsCheck
    }

    fn title(&self) -> &'static str {
        "Check for installation files left behind"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        let Some(filenames) = self.filenames.as_deref() else {
            return Ok(CheckOutcome::unknown("no remnant list available, check skipped"));
        };

        // A server that answers 200 for anything makes every probe a false positive.
        if self.answers_ok(target, &random_path()).await? {
            info!(host = %target.host, "Server returns 200 for any path, skipping remnant probes.");
            return Ok(CheckOutcome::pass("This web server returns a HTTP code of 200 on everything, skipping checks"));
        }

        let mut found = Vec::new();
        for file in filenames {
            match self.answers_ok(target, file).await {
                Ok(true) => {
                    debug!(host = %target.host, file, "Remnant answered 200.");
                    found.push(file.as_str());
                }
                Ok(false) => {}
                Err(e) => warn!(host = %target.host, file, error = %e, "Error checking remnant file."),
            }
        }

        if found.is_empty() {
            Ok(CheckOutcome::pass(format!(
                "No files from the remnant list were found in the web server root of {}.",
                target.host
            )))
        } else {
            let listing: Vec<String> = found.iter().map(|f| format!("- {f}")).collect();
            Ok(CheckOutcome::fail(format!(
                "The following files gave a 200 response from {}:\n{}",
                target.host,
                listing.join("\n")
            )))
        }
    }
}
