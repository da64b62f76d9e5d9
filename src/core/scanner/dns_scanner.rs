// src/core/scanner/dns_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::CheckOutcome;
use crate::core::scanner::{DnsGate, ScanError};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::system_conf::read_system_conf;
use std::time::Duration;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const LOOKUP_ATTEMPTS: usize = 2;

/// Resolves hosts through the system's configured name servers, so split-horizon and
/// internal zones resolve the way they do for the operator.
///
/// Only the address lookup gates the scan. CNAME, MX and TXT records are collected for
/// the report; a missing record of those types is normal and only noted.
pub struct ResolverGate {
    resolver: TokioAsyncResolver,
}

impl Default for ResolverGate {
    fn default() -> Self {
        let (config, opts) = resolver_setup(read_system_conf());
        Self { resolver: TokioAsyncResolver::tokio(config, opts) }
    }
}

/// System configuration with our lookup budget applied. Without a readable system
/// configuration the resolver's built-in name servers are used.
fn resolver_setup(
    system: Result<(ResolverConfig, ResolverOpts), ResolveError>,
) -> (ResolverConfig, ResolverOpts) {
    let (config, mut opts) = system.unwrap_or_else(|e| {
        warn!(error = %e, "Cannot read the system resolver configuration, using built-in name servers.");
        (ResolverConfig::default(), ResolverOpts::default())
    });
    opts.timeout = LOOKUP_TIMEOUT;
    opts.attempts = LOOKUP_ATTEMPTS;
    (config, opts)
}

#[async_trait]
impl DnsGate for ResolverGate {
    async fn resolve(&self, host: &str) -> Result<CheckOutcome, ScanError> {
        info!(host, "Starting DNS check.");
        let addresses = self.resolver.lookup_ip(host).await.map_err(|e| {
            warn!(host, reason = describe_failure(&e), error = %e, "DNS resolution failed.");
            e
        })?;

        let mut lines: Vec<String> = addresses.iter().map(|ip| ip.to_string()).collect();
        if lines.is_empty() {
            warn!(host, "DNS answer carried no addresses.");
            return Err(ScanError::Dns(ResolveError::from("no A or AAAA records")));
        }
        debug!(host, count = lines.len(), "Resolved addresses.");

        let (cname, mx, txt) = tokio::join!(
            self.resolver.lookup(host, RecordType::CNAME),
            self.resolver.mx_lookup(host),
            self.resolver.txt_lookup(host),
        );
        match cname {
            Ok(records) => lines.extend(records.iter().map(|r| format!("cname: {r}"))),
            Err(_) => lines.push("no CNAMEs".to_string()),
        }
        match mx {
            Ok(records) => lines.extend(records.iter().map(|r| format!("mx: {}", r.exchange()))),
            Err(_) => lines.push("no MX records".to_string()),
        }
        match txt {
            Ok(records) => lines.extend(records.iter().map(|r| format!("TXT: {r}"))),
            Err(_) => lines.push("no TXT records".to_string()),
        }

        info!(host, "DNS check finished.");
        Ok(CheckOutcome::pass(lines.join("\n")))
    }
}

/// Short classification of a failed address lookup for the logs.
pub fn describe_failure(error: &ResolveError) -> &'static str {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::NXDomain => "NXDOMAIN",
            ResponseCode::ServFail => "SERVFAIL",
            _ => "no records",
        },
        ResolveErrorKind::Timeout => "timeout",
        _ => "resolver error",
    }
}
