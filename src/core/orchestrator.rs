// src/core/orchestrator.rs

use tracing::{debug, error, info, warn};

use crate::core::context::{RunContext, check_date};
use crate::core::grading::GradingQueue;
use crate::core::models::{CheckField, CheckOutcome, FieldUpdate, Target, Verdict};
use crate::core::report::HostReport;
use crate::core::scanner::testssl_scanner::LocalGrader;
use crate::core::scanner::{Check, DnsGate};
use crate::core::store::ResultStore;
use chrono::Local;
use std::sync::Arc;

const DNS_SECTION: &str = "DNS check";
const LOCAL_GRADE_SECTION: &str = "testssl.sh grade";

/// What the per-host loop did, for the end-of-run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub hosts: usize,
    pub dns_failed: Vec<String>,
    pub unreachable: Vec<String>,
    /// Hosts that cleared both gates.
    pub scanned: usize,
    pub handed_off: usize,
    pub locally_graded: Vec<(String, String)>,
    pub cancelled: bool,
}

/// Runs the per-host state machine: DNS gate, reachability gate, the verdict checks in
/// order, then grading. Hosts are processed one at a time; grading continues in the
/// background through the queue.
pub struct ScanOrchestrator {
    ctx: Arc<RunContext>,
    store: ResultStore,
    dns: Box<dyn DnsGate>,
    reachability: Box<dyn Check>,
    checks: Vec<Box<dyn Check>>,
    local_grader: Option<LocalGrader>,
    grading: Option<GradingQueue>,
    grading_only: bool,
}

impl ScanOrchestrator {
    pub fn new(
        ctx: Arc<RunContext>,
        store: ResultStore,
        dns: Box<dyn DnsGate>,
        reachability: Box<dyn Check>,
        checks: Vec<Box<dyn Check>>,
    ) -> Self {
        Self { ctx, store, dns, reachability, checks, local_grader: None, grading: None, grading_only: false }
    }

    pub fn with_grading(mut self, queue: GradingQueue) -> Self {
        self.grading = Some(queue);
        self
    }

    pub fn with_local_grader(mut self, grader: LocalGrader) -> Self {
        self.local_grader = Some(grader);
        self
    }

    /// Skip the verdict checks; only the gates and grading run.
    pub fn grading_only(mut self, only: bool) -> Self {
        self.grading_only = only;
        self
    }

    /// Scans every host once. Consumes the orchestrator so the grading queue closes
    /// when the loop is done.
    pub async fn run(self, hosts: &[String]) -> ScanSummary {
        let mut summary = ScanSummary { hosts: hosts.len(), ..ScanSummary::default() };
        for (index, host) in hosts.iter().enumerate() {
            if self.ctx.is_cancelled() {
                info!(remaining = hosts.len() - index, "Scan cancelled, skipping remaining hosts.");
                summary.cancelled = true;
                break;
            }
            info!(host = %host, position = index + 1, total = hosts.len(), "Scanning host.");
            self.scan_host(host, &mut summary).await;
        }
        summary
    }

    async fn scan_host(&self, host: &str, summary: &mut ScanSummary) {
        let date = check_date(Local::now());
        if let Err(e) = self.store.ensure(host).await {
            error!(host, error = %e, "Could not create compliance record.");
        }
        self.persist(host, FieldUpdate::new().check_date(&date)).await;
        let mut report = HostReport::create(self.ctx.output_dir(), host, &date);

        report.section(DNS_SECTION);
        match self.dns.resolve(host).await {
            Ok(outcome) => report.line(&outcome.transcript),
            Err(e) => {
                warn!(host, error = %e, "Skipping host, it does not resolve.");
                report.line(&format!("DNS resolution failed: {e}"));
                summary.dns_failed.push(host.to_string());
                return;
            }
        }

        let target = match Target::new(host) {
            Ok(target) => target,
            Err(e) => {
                warn!(host, error = %e, "Host does not form a valid URL.");
                report.line(&format!("invalid host name: {e}"));
                self.persist(host, FieldUpdate::new().verdict(CheckField::HttpsReachable, Verdict::Fail)).await;
                summary.unreachable.push(host.to_string());
                return;
            }
        };

        let reach = self.run_guarded(self.reachability.as_ref(), &target).await;
        report.outcome(self.reachability.title(), &reach);
        self.persist(host, FieldUpdate::new().verdict(CheckField::HttpsReachable, reach.verdict)).await;
        if reach.verdict != Verdict::Pass {
            info!(host, "Not reachable over HTTPS, remaining checks skipped.");
            summary.unreachable.push(host.to_string());
            return;
        }
        summary.scanned += 1;

        if !self.grading_only {
            for check in &self.checks {
                let outcome = self.run_guarded(check.as_ref(), &target).await;
                report.outcome(check.title(), &outcome);
                self.persist(host, FieldUpdate::new().verdict(check.field(), outcome.verdict)).await;
            }
        }

        if let Some(grader) = &self.local_grader {
            let graded = grader.grade(host).await;
            match graded {
                Ok(local) => {
                    report.outcome(LOCAL_GRADE_SECTION, &local.outcome);
                    if let Some(grade) = local.grade {
                        self.persist(host, FieldUpdate::new().grade(Some(&grade))).await;
                        summary.locally_graded.push((host.to_string(), grade));
                    }
                }
                Err(e) => {
                    warn!(host, error = %e, "Local grading failed.");
                    report.outcome(LOCAL_GRADE_SECTION, &CheckOutcome::unknown(e.to_string()));
                }
            }
        }

        // The scheduler appends to the same report file.
        drop(report);
        if let Some(queue) = &self.grading {
            if queue.submit(host) {
                debug!(host, "Handed host to the grading scheduler.");
                summary.handed_off += 1;
            } else {
                warn!(host, "Grading scheduler has stopped, host will not be graded.");
            }
        }
    }

    /// A failing check degrades to an indeterminate verdict for its own field only.
    async fn run_guarded(&self, check: &dyn Check, target: &Target) -> CheckOutcome {
        match check.run(target).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(host = %target.host, check = check.title(), error = %e, "Check failed, verdict left indeterminate.");
                CheckOutcome::unknown(format!("check could not complete: {e}"))
            }
        }
    }

    async fn persist(&self, host: &str, update: FieldUpdate) {
        if let Err(e) = self.store.update(host, update).await {
            error!(host, error = %e, "Could not persist result.");
        }
    }
}
