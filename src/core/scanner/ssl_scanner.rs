// src/core/scanner/ssl_scanner.rs

use tracing::{debug, error, info, warn};

use crate::core::models::{CheckField, CheckOutcome, Target, Verdict};
use crate::core::scanner::{Check, REQUEST_TIMEOUT, ScanError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio::task::spawn_blocking;
use x509_parser::prelude::*;

/// Certificates with fewer days left than this are flagged.
pub const MIN_DAYS_LEFT: i64 = 30;

/// What the leaf certificate tells us.
#[derive(Debug, Clone)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
    pub days_left: i64,
}

/// Why a certificate probe did not yield a certificate.
#[derive(Debug)]
enum ProbeFailure {
    /// The handshake itself failed: expired, self-signed or wrong host.
    Handshake(String),
    Other(ScanError),
}

/// Verifies the chain and hostname on port 443 and checks the remaining lifetime.
pub struct CertificateCheck {
    port: u16,
    timeout: Duration,
}

impl Default for CertificateCheck {
    fn default() -> Self {
        Self { port: 443, timeout: REQUEST_TIMEOUT }
    }
}

#[async_trait]
impl Check for CertificateCheck {
    fn field(&self) -> CheckField {
        CheckField::CertCheck
    }

    fn title(&self) -> &'static str {
        "Certificate validity Check"
    }

    async fn run(&self, target: &Target) -> Result<CheckOutcome, ScanError> {
        info!(host = %target.host, "Starting certificate check.");
        let host = target.host.clone();
        let (port, timeout) = (self.port, self.timeout);

        debug!("Spawning blocking task for TLS connection.");
        let result = spawn_blocking(move || perform_tls_probe(&host, port, timeout))
            .await
            .map_err(|e| {
                error!(panic = %e, "Blocking certificate task panicked!");
                ScanError::Join(e.to_string())
            })?;

        match result {
            Ok(summary) => Ok(analyze_certificate(&summary, Utc::now())),
            Err(ProbeFailure::Handshake(message)) => {
                warn!(host = %target.host, error = %message, "TLS handshake failed.");
                Ok(CheckOutcome::fail(format!("TLS Handshake Error: {message}")))
            }
            Err(ProbeFailure::Other(e)) => Err(e),
        }
    }
}

fn perform_tls_probe(host: &str, port: u16, timeout: Duration) -> Result<CertificateSummary, ProbeFailure> {
    let connector = TlsConnector::new().map_err(|e| ProbeFailure::Other(ScanError::Tls(e.to_string())))?;

    debug!(host, port, "Connecting TCP stream.");
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| ProbeFailure::Other(e.into()))?
        .next()
        .ok_or_else(|| ProbeFailure::Other(ScanError::Tls(format!("no address for {host}"))))?;
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| ProbeFailure::Other(e.into()))?;
    stream.set_read_timeout(Some(timeout)).map_err(|e| ProbeFailure::Other(e.into()))?;
    stream.set_write_timeout(Some(timeout)).map_err(|e| ProbeFailure::Other(e.into()))?;

    debug!(host, "Performing TLS handshake.");
    let stream = connector.connect(host, stream).map_err(|e| ProbeFailure::Handshake(e.to_string()))?;

    let cert = match stream.peer_certificate() {
        Ok(Some(c)) => c,
        Ok(None) => return Err(ProbeFailure::Handshake("server did not present a certificate".to_string())),
        Err(e) => return Err(ProbeFailure::Other(ScanError::Tls(e.to_string()))),
    };
    let cert_der = cert.to_der().map_err(|e| ProbeFailure::Other(ScanError::Tls(e.to_string())))?;
    let (_, x509) = parse_x509_certificate(&cert_der)
        .map_err(|e| ProbeFailure::Other(ScanError::Tls(format!("X.509 Parse Error: {e}"))))?;

    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Successfully parsed certificate.");
    let not_after = asn1_time_to_chrono_utc(&x509.validity().not_after);
    Ok(CertificateSummary {
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        not_after,
        days_left: not_after.signed_duration_since(Utc::now()).num_days(),
    })
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

pub fn analyze_certificate(summary: &CertificateSummary, now: DateTime<Utc>) -> CheckOutcome {
    let verdict = Verdict::from_bool(summary.days_left >= MIN_DAYS_LEFT);
    let transcript = format!(
        "certificate expiration: {}\ntime of check (utc)   : {}\ncertificate days left : {}\ncertificate issuer    : {}\ncertificate subject   : {}",
        summary.not_after, now, summary.days_left, summary.issuer, summary.subject
    );
    CheckOutcome::new(verdict, transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn summary(days_left: i64) -> CertificateSummary {
        CertificateSummary {
            subject: "CN=good.example".to_string(),
            issuer: "CN=Example CA".to_string(),
            not_after: Utc::now() + ChronoDuration::days(days_left),
            days_left,
        }
    }

    #[test]
    fn thirty_days_left_passes() {
        assert_eq!(analyze_certificate(&summary(30), Utc::now()).verdict, Verdict::Pass);
        assert_eq!(analyze_certificate(&summary(400), Utc::now()).verdict, Verdict::Pass);
    }

    #[test]
    fn twenty_nine_days_left_fails() {
        let outcome = analyze_certificate(&summary(29), Utc::now());
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert!(outcome.transcript.contains("certificate days left : 29"));
    }
}
