// src/app.rs

use tracing::{info, warn};

use crate::config::Settings;
use crate::core::context::RunContext;
use crate::core::export::export_table;
use crate::core::grading::{GradingScheduler, GradingSummary, RateLimit, SslLabsClient, TokioSleeper};
use crate::core::hosts::read_remnant_list;
use crate::core::orchestrator::{ScanOrchestrator, ScanSummary};
use crate::core::scanner::dns_scanner::ResolverGate;
use crate::core::scanner::reachability_scanner::HttpsReachabilityCheck;
use crate::core::scanner::testssl_scanner::LocalGrader;
use crate::core::scanner::{HttpProbe, standard_checks};
use crate::core::store::{DATABASE_FILE, ResultStore};
use color_eyre::eyre::{Result, WrapErr};
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What one invocation did, printed once everything has finished.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub scan: ScanSummary,
    pub grading: Option<GradingSummary>,
    /// Assessments requested from the grading service, retries included.
    pub assessments_started: u32,
    /// The service's capacity as last reported.
    pub last_capacity: Option<RateLimit>,
}

impl RunReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Results written to {}", self.output_dir.display());
        let _ = writeln!(out, "hosts read            : {}", self.scan.hosts);
        let _ = writeln!(out, "skipped at DNS        : {}", self.scan.dns_failed.len());
        let _ = writeln!(out, "unreachable over HTTPS: {}", self.scan.unreachable.len());
        let _ = writeln!(out, "scanned               : {}", self.scan.scanned);

        let graded = self.scan.locally_graded.len() + self.grading.as_ref().map_or(0, |g| g.graded.len());
        let _ = writeln!(out, "graded                : {graded}");
        if let Some(grading) = &self.grading {
            let _ = writeln!(out, "grading passes        : {}", grading.passes);
            let _ = writeln!(out, "assessments started   : {}", self.assessments_started);
            if let Some(limit) = self.last_capacity {
                let _ = writeln!(out, "service capacity      : {}/{} in use", limit.current, limit.max);
            }
            if !grading.ungraded.is_empty() {
                let _ = writeln!(out, "could not be graded   : {}", grading.ungraded.join(", "));
            }
        }
        let interrupted = self.scan.cancelled || self.grading.as_ref().is_some_and(|g| g.cancelled);
        if interrupted {
            let _ = writeln!(out, "run was interrupted; unfinished hosts keep their previous values");
        }
        out
    }
}

pub struct App {
    settings: Settings,
    output_dir: PathBuf,
    cancel: CancellationToken,
}

impl App {
    pub fn new(settings: Settings, output_dir: PathBuf) -> Self {
        Self { settings, output_dir, cancel: CancellationToken::new() }
    }

    /// Tripping this stops new hosts and new assessments; in-flight work winds down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, hosts: &[String]) -> Result<RunReport> {
        let settings = &self.settings;
        let store_path = self.output_dir.join(DATABASE_FILE);
        let store = ResultStore::open(&store_path)
            .wrap_err_with(|| format!("cannot open result store {}", store_path.display()))?;
        let ctx = Arc::new(RunContext::new(self.output_dir.clone(), self.cancel.clone()));

        let remnants = match read_remnant_list(&settings.remnants) {
            Ok(list) => Some(Arc::new(list)),
            Err(e) => {
                warn!(path = %settings.remnants.display(), error = %e, "No remnant list, that check stays indeterminate.");
                None
            }
        };
        let probe = HttpProbe::new(settings.identity).wrap_err("cannot build HTTP client")?;

        let mut orchestrator = ScanOrchestrator::new(
            ctx.clone(),
            store.clone(),
            Box::new(ResolverGate::default()),
            Box::new(HttpsReachabilityCheck::new(probe.clone())),
            standard_checks(&probe, remnants),
        )
        .grading_only(settings.grading_only());

        if settings.uses_local_grading() {
            orchestrator =
                orchestrator.with_local_grader(LocalGrader::new(&settings.testssl_path, settings.testssl_timeout));
        }

        let mut grading = None;
        if settings.uses_external_grading() {
            let client = SslLabsClient::new(&settings.api_url, settings.identity)
                .wrap_err("cannot build grading client")?;
            let scheduler = GradingScheduler::new(
                ctx.clone(),
                store.clone(),
                Arc::new(client),
                Arc::new(TokioSleeper),
                settings.grading_config.clone(),
            );
            let (queue, handle) = scheduler.spawn();
            orchestrator = orchestrator.with_grading(queue);
            grading = Some(handle);
        }

        info!(hosts = hosts.len(), output = %self.output_dir.display(), "Starting scan.");
        let scan = orchestrator.run(hosts).await;
        info!(scanned = scan.scanned, "Per-host checks finished.");

        let grading = match grading {
            Some(handle) => {
                info!("Waiting for outstanding grading assessments.");
                let summary = handle.await.wrap_err("grading scheduler stopped unexpectedly")?;
                info!(passes = ctx.passes(), attempts = ctx.attempts(), "Grading finished.");
                Some(summary)
            }
            None => None,
        };

        Ok(RunReport {
            output_dir: self.output_dir.clone(),
            scan,
            grading,
            assessments_started: ctx.attempts(),
            last_capacity: ctx.last_rate_limit(),
        })
    }
}

/// Writes an existing result store to `out` as a semicolon-separated table.
pub async fn export_results<W: Write>(database: &Path, out: &mut W) -> Result<usize> {
    let store = ResultStore::open_existing(database)
        .wrap_err_with(|| format!("cannot open result store {}", database.display()))?;
    let rows = export_table(&store, out).await.wrap_err("cannot export result store")?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_ungraded_hosts() {
        let report = RunReport {
            output_dir: PathBuf::from("20261019"),
            scan: ScanSummary {
                hosts: 3,
                dns_failed: vec!["bad.example".to_string()],
                scanned: 2,
                handed_off: 2,
                ..ScanSummary::default()
            },
            grading: Some(GradingSummary {
                graded: vec![("good.example".to_string(), "A".to_string())],
                ungraded: vec!["slow.example".to_string()],
                passes: 10,
                cancelled: false,
            }),
            assessments_started: 12,
            last_capacity: Some(RateLimit { max: 25, current: 3 }),
        };

        let text = report.render();
        assert!(text.contains("hosts read            : 3"));
        assert!(text.contains("skipped at DNS        : 1"));
        assert!(text.contains("graded                : 1"));
        assert!(text.contains("could not be graded   : slow.example"));
        assert!(text.contains("assessments started   : 12"));
        assert!(text.contains("service capacity      : 3/25 in use"));
        assert!(!text.contains("interrupted"));
    }

    #[tokio::test]
    async fn unusable_output_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let settings = Settings { grading: crate::config::GradingMode::Off, ..Settings::default() };

        let app = App::new(settings, blocker.join("20261019"));
        assert!(app.run(&["good.example".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn exporting_a_missing_store_fails_without_creating_it() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join(DATABASE_FILE);
        let mut out = Vec::new();

        assert!(export_results(&database, &mut out).await.is_err());
        assert!(!database.exists());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn exports_an_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join(DATABASE_FILE);
        ResultStore::open(&database).unwrap().ensure("good.example").await.unwrap();
        let mut out = Vec::new();

        assert_eq!(export_results(&database, &mut out).await.unwrap(), 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("host;check_date;"));
        assert!(text.contains("\ngood.example;None;"));
    }
}
