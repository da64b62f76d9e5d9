// src/core/grading/scheduler.rs

use tracing::{debug, error, info, warn};

use crate::core::context::RunContext;
use crate::core::grading::client::{AssessmentHandle, AssessmentStatus, EndpointGrade, GradingClient, PollOutcome};
use crate::core::grading::clock::Sleeper;
use crate::core::models::{FieldUpdate, Verdict, grade_is_compliant};
use crate::core::report::{HostReport, write_artifact};
use crate::core::store::ResultStore;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};

/// Consecutive capacity reads that may fail before we fall back to one task at a time.
const MAX_SNAPSHOT_FAILURES: u32 = 3;
const REPORT_SECTION: &str = "Qualys SSLscan";

#[derive(Debug, Clone)]
pub struct GradingConfig {
    /// Accept a cached assessment on the first pass. Retry passes always do.
    pub use_cache: bool,
    pub max_passes: u32,
    /// Wait between polls while the assessment has not started.
    pub pending_interval: Duration,
    /// Wait between polls once it is running.
    pub in_progress_interval: Duration,
    pub capacity_backoff: Duration,
    /// Backoffs a pass sits through while the service reports no room and none of our
    /// own assessments are running. After that the rest of the pass goes on the retry list.
    pub max_capacity_waits: u32,
    pub rate_limit_cooldown: Duration,
    pub max_start_retries: u32,
    pub max_polls: u32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            use_cache: false,
            max_passes: 10,
            pending_interval: Duration::from_secs(5),
            in_progress_interval: Duration::from_secs(10),
            capacity_backoff: Duration::from_secs(30),
            max_capacity_waits: 20,
            rate_limit_cooldown: Duration::from_secs(30),
            max_start_retries: 4,
            max_polls: 90,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradingSummary {
    /// Host and recorded grade.
    pub graded: Vec<(String, String)>,
    /// Hosts that could not be graded, including those abandoned on cancellation.
    pub ungraded: Vec<String>,
    pub passes: u32,
    pub cancelled: bool,
}

#[derive(Debug)]
enum TaskResult {
    Graded(String),
    Retry(String),
    Cancelled,
}

enum Admission {
    Admitted,
    /// The service kept reporting no room for the whole wait budget.
    Saturated,
    Cancelled,
}

#[derive(Debug, Default)]
struct Tally {
    graded: Vec<(String, String)>,
    retry: Vec<String>,
    cancelled: Vec<String>,
    /// Host of every task still in the set, so a task that dies keeps its host.
    running: HashMap<Id, String>,
}

impl Tally {
    fn settle(&mut self, joined: Result<(Id, (String, TaskResult)), JoinError>) {
        match joined {
            Ok((id, (host, result))) => {
                self.running.remove(&id);
                match result {
                    TaskResult::Graded(grade) => self.graded.push((host, grade)),
                    TaskResult::Retry(reason) => {
                        info!(host = %host, reason = %reason, "Host goes on the grading retry list.");
                        self.retry.push(host);
                    }
                    TaskResult::Cancelled => self.cancelled.push(host),
                }
            }
            Err(e) => match self.running.remove(&e.id()) {
                Some(host) => {
                    error!(host = %host, error = %e, "Grading task panicked!");
                    self.retry.push(host);
                }
                None => error!(error = %e, "Grading task panicked!"),
            },
        }
    }
}

/// Sending side of the scheduler. Dropping it tells the scheduler no more hosts are coming.
pub struct GradingQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl GradingQueue {
    /// Returns false once the scheduler has stopped accepting hosts.
    pub fn submit(&self, host: &str) -> bool {
        self.tx.send(host.to_string()).is_ok()
    }
}

/// Grades every submitted host at most once per pass, never running more assessments
/// than the service admits, and re-runs hosts without a usable grade in later passes.
pub struct GradingScheduler {
    ctx: Arc<RunContext>,
    store: ResultStore,
    client: Arc<dyn GradingClient>,
    sleeper: Arc<dyn Sleeper>,
    config: GradingConfig,
}

impl GradingScheduler {
    pub fn new(
        ctx: Arc<RunContext>,
        store: ResultStore,
        client: Arc<dyn GradingClient>,
        sleeper: Arc<dyn Sleeper>,
        config: GradingConfig,
    ) -> Self {
        Self { ctx, store, client, sleeper, config }
    }

    /// Starts the scheduler in the background. The summary is available once the
    /// queue has been dropped and every pass has finished.
    pub fn spawn(self) -> (GradingQueue, JoinHandle<GradingSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(self);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        (GradingQueue { tx }, handle)
    }

    async fn run(self: Arc<Self>, rx: mpsc::UnboundedReceiver<String>) -> GradingSummary {
        let mut graded = Vec::new();
        let mut abandoned = Vec::new();
        let mut source = rx;
        let mut use_cache = self.config.use_cache;
        let mut passes = 0;

        let exhausted = loop {
            passes += 1;
            self.ctx.begin_pass(passes);
            let tally = self.run_pass(source, use_cache).await;
            info!(pass = passes, graded = tally.graded.len(), retry = tally.retry.len(), "Grading pass finished.");
            graded.extend(tally.graded);
            abandoned.extend(tally.cancelled);

            if tally.retry.is_empty() || passes >= self.config.max_passes || self.ctx.is_cancelled() {
                break tally.retry;
            }
            source = queue_of(&tally.retry);
            use_cache = true;
        };

        let cancelled = self.ctx.is_cancelled();
        if !cancelled {
            for host in &exhausted {
                warn!(host = %host, passes, "Could not be graded.");
                if let Err(e) = self.store.update(host, FieldUpdate::new().grade(None)).await {
                    error!(host = %host, error = %e, "Could not reset grade.");
                }
            }
        }

        let mut ungraded = exhausted;
        ungraded.extend(abandoned);
        GradingSummary { graded, ungraded, passes, cancelled }
    }

    async fn run_pass(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<String>, use_cache: bool) -> Tally {
        let mut tally = Tally::default();
        let mut tasks: JoinSet<(String, TaskResult)> = JoinSet::new();
        let mut seen = HashSet::new();
        let mut open = true;
        let mut saturated = false;
        let cancel = self.ctx.cancel_token().clone();

        loop {
            if !open && tasks.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Grading cancelled, no new assessments will be started.");
                    break;
                }
                Some(joined) = tasks.join_next_with_id() => tally.settle(joined),
                next = rx.recv(), if open => match next {
                    Some(host) => {
                        if !seen.insert(host.clone()) {
                            debug!(host = %host, "Host already queued in this pass.");
                            continue;
                        }
                        if saturated {
                            tally.retry.push(host);
                            continue;
                        }
                        match self.wait_for_capacity(&mut tasks, &mut tally).await {
                            Admission::Admitted => self.dispatch(&mut tasks, &mut tally, host, use_cache),
                            Admission::Saturated => {
                                warn!(host = %host, "Grading service stayed full, deferring the rest of this pass.");
                                saturated = true;
                                tally.retry.push(host);
                            }
                            Admission::Cancelled => {
                                tally.cancelled.push(host);
                                break;
                            }
                        }
                    }
                    None => open = false,
                },
            }
        }

        if cancel.is_cancelled() {
            while let Ok(host) = rx.try_recv() {
                if seen.insert(host.clone()) {
                    tally.cancelled.push(host);
                }
            }
        }
        while let Some(joined) = tasks.join_next_with_id().await {
            tally.settle(joined);
        }
        tally
    }

    /// Blocks until the service admits another assessment.
    ///
    /// Waiting on our own running assessments is bounded by their poll budget. Waiting on a
    /// service that reports no room while we run nothing is bounded by `max_capacity_waits`.
    async fn wait_for_capacity(&self, tasks: &mut JoinSet<(String, TaskResult)>, tally: &mut Tally) -> Admission {
        let mut failures = 0;
        let mut idle_waits = 0;
        loop {
            if self.ctx.is_cancelled() {
                return Admission::Cancelled;
            }
            while let Some(joined) = tasks.try_join_next_with_id() {
                tally.settle(joined);
            }
            let in_flight = tasks.len();

            match self.client.rate_limit_snapshot().await {
                Ok(limit) => {
                    failures = 0;
                    self.ctx.record_rate_limit(limit);
                    if limit.admits(in_flight) {
                        return Admission::Admitted;
                    }
                    if in_flight > 0 {
                        idle_waits = 0;
                    } else if idle_waits >= self.config.max_capacity_waits {
                        return Admission::Saturated;
                    } else {
                        idle_waits += 1;
                    }
                    debug!(max = limit.max, current = limit.current, in_flight, "At grading capacity, backing off.");
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "Could not read grading capacity.");
                    if failures >= MAX_SNAPSHOT_FAILURES && in_flight == 0 {
                        warn!("Capacity unknown, dispatching a single assessment.");
                        return Admission::Admitted;
                    }
                }
            }
            if !self.pause(self.config.capacity_backoff).await {
                return Admission::Cancelled;
            }
        }
    }

    fn dispatch(
        self: &Arc<Self>,
        tasks: &mut JoinSet<(String, TaskResult)>,
        tally: &mut Tally,
        host: String,
        use_cache: bool,
    ) {
        info!(host = %host, use_cache, in_flight = tasks.len(), "Dispatching grading task.");
        let scheduler = Arc::clone(self);
        let task_host = host.clone();
        let task = tasks.spawn(async move {
            let result = scheduler.grade_host(&task_host, use_cache).await;
            (task_host, result)
        });
        tally.running.insert(task.id(), host);
    }

    /// Sleeps unless cancelled first. Returns whether the full wait elapsed.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.ctx.cancel_token().cancelled() => false,
            _ = self.sleeper.sleep(duration) => true,
        }
    }

    async fn grade_host(&self, host: &str, use_cache: bool) -> TaskResult {
        let store = match self.store.session() {
            Ok(store) => store,
            Err(e) => {
                error!(host, error = %e, "Could not open a store session.");
                return TaskResult::Retry(format!("store unavailable: {e}"));
            }
        };
        let handle = match self.start(host, use_cache).await {
            Ok(handle) => handle,
            Err(result) => return result,
        };
        if !self.pause(self.config.pending_interval).await {
            return TaskResult::Cancelled;
        }

        for poll in 1..=self.config.max_polls {
            let outcome = match self.client.poll(&handle).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(host, error = %e, transient = e.is_transient(), "Polling assessment failed.");
                    return TaskResult::Retry(e.to_string());
                }
            };
            let wait = match outcome.status {
                AssessmentStatus::Ready => return self.record_ready(&store, host, outcome).await,
                AssessmentStatus::Error => {
                    let reason = outcome.message.unwrap_or_else(|| "assessment failed".to_string());
                    warn!(host, reason = %reason, "Assessment ended in error.");
                    return TaskResult::Retry(reason);
                }
                AssessmentStatus::InProgress => self.config.in_progress_interval,
                AssessmentStatus::Pending => self.config.pending_interval,
            };
            debug!(host, poll, status = ?outcome.status, "Assessment not finished yet.");
            if !self.pause(wait).await {
                return TaskResult::Cancelled;
            }
        }
        TaskResult::Retry(format!("no result after {} polls", self.config.max_polls))
    }

    async fn start(&self, host: &str, use_cache: bool) -> Result<AssessmentHandle, TaskResult> {
        let mut retries = 0;
        loop {
            self.ctx.count_attempt();
            match self.client.start_assessment(host, use_cache).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_rate_limited() && retries < self.config.max_start_retries => {
                    retries += 1;
                    warn!(host, retries, cooldown = ?self.config.rate_limit_cooldown, "Rate limited, cooling down.");
                    if !self.pause(self.config.rate_limit_cooldown).await {
                        return Err(TaskResult::Cancelled);
                    }
                }
                Err(e) => {
                    warn!(host, error = %e, "Could not start assessment.");
                    return Err(TaskResult::Retry(e.to_string()));
                }
            }
        }
    }

    async fn record_ready(&self, store: &ResultStore, host: &str, outcome: PollOutcome) -> TaskResult {
        let Some(grade) = outcome.grade else {
            return TaskResult::Retry("assessment ready without a grade".to_string());
        };
        if let Err(e) = store.update(host, FieldUpdate::new().grade(Some(&grade))).await {
            error!(host, error = %e, "Could not record grade.");
            return TaskResult::Retry(format!("store write failed: {e}"));
        }

        let dir = self.ctx.output_dir().to_path_buf();
        let (file_host, file_grade) = (host.to_string(), grade.clone());
        let written = tokio::task::spawn_blocking(move || {
            write_grading_files(&dir, &file_host, &file_grade, &outcome.endpoints, &outcome.raw)
        })
        .await;
        if let Err(e) = written {
            error!(host, error = %e, "Could not write grading files.");
        }

        info!(host, grade = %grade, "Host graded.");
        TaskResult::Graded(grade)
    }
}

/// The raw assessment next to the run's results, plus a section in the host's report.
fn write_grading_files(dir: &Path, host: &str, grade: &str, endpoints: &[EndpointGrade], raw: &str) {
    write_artifact(dir, &format!("{host}-sslscan.json"), raw);
    let mut report = HostReport::append(dir, host);
    report.section(REPORT_SECTION);
    report.line(Verdict::from_bool(grade_is_compliant(grade)).label());
    report.line(&format!("grade: {grade}"));
    for endpoint in endpoints {
        report.line(&format!("{}: {}", endpoint.ip_address, endpoint.grade.as_deref().unwrap_or("-")));
    }
}

fn queue_of(hosts: &[String]) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    for host in hosts {
        // The receiver is alive in this scope, so the send cannot fail.
        let _ = tx.send(host.clone());
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grading::client::{GradingError, RateLimit};
    use crate::core::models::CheckField;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// How a host's first assessment goes wrong.
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Fault {
        None,
        ErrorStatus,
        PollFails,
        Panics,
    }

    /// Scripted grading service. Each attempt walks `script` and then reports READY;
    /// the grade is only present from attempt `succeed_on_attempt` on.
    ///
    /// Capacity reads come from `snapshots` while it lasts, then from `limit`.
    /// `None` in either place is a failed read.
    struct FakeClient {
        limit: Option<RateLimit>,
        snapshots: Mutex<VecDeque<Option<RateLimit>>>,
        first_attempt: Fault,
        events: Mutex<Vec<&'static str>>,
        grade: &'static str,
        succeed_on_attempt: usize,
        script: Vec<AssessmentStatus>,
        rate_limited_starts: usize,
        throttled: AtomicUsize,
        starts: Mutex<HashMap<String, usize>>,
        polls: Mutex<HashMap<String, usize>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeClient {
        fn new(grade: &'static str) -> Self {
            Self {
                limit: Some(RateLimit { max: 25, current: 0 }),
                snapshots: Mutex::new(VecDeque::new()),
                first_attempt: Fault::None,
                events: Mutex::new(Vec::new()),
                grade,
                succeed_on_attempt: 1,
                script: Vec::new(),
                rate_limited_starts: 0,
                throttled: AtomicUsize::new(0),
                starts: Mutex::new(HashMap::new()),
                polls: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn started(&self) -> usize {
            self.starts.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl GradingClient for FakeClient {
        async fn start_assessment(&self, host: &str, use_cache: bool) -> Result<AssessmentHandle, GradingError> {
            if self.throttled.fetch_add(1, Ordering::SeqCst) < self.rate_limited_starts {
                return Err(GradingError::RateLimited(429));
            }
            self.events.lock().unwrap().push("start");
            *self.starts.lock().unwrap().entry(host.to_string()).or_default() += 1;
            self.polls.lock().unwrap().insert(host.to_string(), 0);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(AssessmentHandle { host: host.to_string(), use_cache })
        }

        async fn poll(&self, handle: &AssessmentHandle) -> Result<PollOutcome, GradingError> {
            let attempt = self.starts.lock().unwrap().get(&handle.host).copied().unwrap_or(0);
            let index = {
                let mut polls = self.polls.lock().unwrap();
                let count = polls.entry(handle.host.clone()).or_default();
                *count += 1;
                *count - 1
            };
            if attempt == 1 {
                match self.first_attempt {
                    Fault::None => {}
                    Fault::ErrorStatus => {
                        self.active.fetch_sub(1, Ordering::SeqCst);
                        return Ok(PollOutcome {
                            status: AssessmentStatus::Error,
                            grade: None,
                            message: Some("Unable to connect to the server".to_string()),
                            endpoints: Vec::new(),
                            raw: "{}".to_string(),
                        });
                    }
                    Fault::PollFails => {
                        self.active.fetch_sub(1, Ordering::SeqCst);
                        return Err(GradingError::Status(503));
                    }
                    Fault::Panics => panic!("assessment for {} blew up", handle.host),
                }
            }
            let status = self.script.get(index).copied().unwrap_or(AssessmentStatus::Ready);
            let grade = (status == AssessmentStatus::Ready && attempt >= self.succeed_on_attempt)
                .then(|| self.grade.to_string());
            if status == AssessmentStatus::Ready {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(PollOutcome { status, grade, message: None, endpoints: Vec::new(), raw: "{}".to_string() })
        }

        async fn rate_limit_snapshot(&self) -> Result<RateLimit, GradingError> {
            self.events.lock().unwrap().push("snapshot");
            let scripted = self.snapshots.lock().unwrap().pop_front();
            scripted.unwrap_or(self.limit).ok_or(GradingError::Status(503))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
            tokio::task::yield_now().await;
        }
    }

    struct HangingSleeper;

    #[async_trait]
    impl Sleeper for HangingSleeper {
        async fn sleep(&self, _duration: Duration) {
            std::future::pending::<()>().await;
        }
    }

    struct Harness {
        dir: TempDir,
        store: ResultStore,
        ctx: Arc<RunContext>,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("websites.db")).unwrap();
        let ctx = Arc::new(RunContext::new(dir.path(), CancellationToken::new()));
        Harness { dir, store, ctx }
    }

    async fn grade_all(
        h: &Harness,
        client: Arc<FakeClient>,
        sleeper: Arc<dyn Sleeper>,
        config: GradingConfig,
        hosts: &[&str],
    ) -> GradingSummary {
        let scheduler = GradingScheduler::new(h.ctx.clone(), h.store.clone(), client, sleeper, config);
        let (queue, handle) = scheduler.spawn();
        for host in hosts {
            assert!(queue.submit(host));
        }
        drop(queue);
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn never_exceeds_advertised_capacity() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.limit = Some(RateLimit { max: 2, current: 0 });
        fake.script = vec![AssessmentStatus::Pending, AssessmentStatus::InProgress];
        let client = Arc::new(fake);
        let hosts = ["a.example", "b.example", "c.example", "d.example", "e.example", "f.example"];

        let summary =
            grade_all(&h, client.clone(), Arc::new(RecordingSleeper::default()), GradingConfig::default(), &hosts).await;

        assert!(client.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(summary.graded.len(), 6);
        assert!(summary.ungraded.is_empty());
        for host in hosts {
            let record = h.store.record(host).await.unwrap().unwrap();
            assert_eq!(record.grade.as_deref(), Some("A"));
            assert_eq!(record.verdict(CheckField::GradeCheck), Verdict::Pass);
        }
    }

    #[tokio::test]
    async fn converges_when_second_attempt_succeeds() {
        let h = harness();
        let mut fake = FakeClient::new("A+");
        fake.succeed_on_attempt = 2;
        let client = Arc::new(fake);
        let hosts = ["a.example", "b.example", "c.example"];

        let summary =
            grade_all(&h, client.clone(), Arc::new(RecordingSleeper::default()), GradingConfig::default(), &hosts).await;

        assert_eq!(summary.passes, 2);
        assert_eq!(summary.graded.len(), 3);
        assert!(summary.ungraded.is_empty());
        assert_eq!(client.started(), 6);
        for host in hosts {
            assert_eq!(h.store.record(host).await.unwrap().unwrap().grade.as_deref(), Some("A+"));
        }
    }

    #[tokio::test]
    async fn exhausted_hosts_are_reset_to_indeterminate() {
        let h = harness();
        h.store.update("stuck.example", FieldUpdate::new().grade(Some("B"))).await.unwrap();
        let mut fake = FakeClient::new("A");
        fake.succeed_on_attempt = usize::MAX;
        let config = GradingConfig { max_passes: 3, ..GradingConfig::default() };

        let summary =
            grade_all(&h, Arc::new(fake), Arc::new(RecordingSleeper::default()), config, &["stuck.example"]).await;

        assert_eq!(summary.passes, 3);
        assert_eq!(summary.ungraded, vec!["stuck.example".to_string()]);
        assert!(!summary.cancelled);
        let record = h.store.record("stuck.example").await.unwrap().unwrap();
        assert_eq!(record.grade, None);
        assert_eq!(record.verdict(CheckField::GradeCheck), Verdict::Unknown);
    }

    #[tokio::test]
    async fn follows_polling_cadence_and_records_non_compliant_grade() {
        let h = harness();
        let mut fake = FakeClient::new("B");
        fake.script = vec![AssessmentStatus::Pending, AssessmentStatus::InProgress, AssessmentStatus::InProgress];
        let sleeper = Arc::new(RecordingSleeper::default());

        let summary =
            grade_all(&h, Arc::new(fake), sleeper.clone(), GradingConfig::default(), &["good.example"]).await;

        let secs: Vec<u64> = sleeper.waits.lock().unwrap().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![5, 5, 10, 10]);
        assert_eq!(summary.graded, vec![("good.example".to_string(), "B".to_string())]);
        let record = h.store.record("good.example").await.unwrap().unwrap();
        assert_eq!(record.verdict(CheckField::GradeCheck), Verdict::Fail);

        let report = std::fs::read_to_string(HostReport::path_for(h.dir.path(), "good.example")).unwrap();
        assert!(report.contains("===========Qualys SSLscan"));
        assert!(report.contains("grade: B"));
        assert!(h.dir.path().join("good.example-sslscan.json").exists());
    }

    #[tokio::test]
    async fn cools_down_when_rate_limited() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.rate_limited_starts = 2;
        let sleeper = Arc::new(RecordingSleeper::default());

        let summary =
            grade_all(&h, Arc::new(fake), sleeper.clone(), GradingConfig::default(), &["good.example"]).await;

        let secs: Vec<u64> = sleeper.waits.lock().unwrap().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![30, 30, 5]);
        assert_eq!(summary.graded.len(), 1);
    }

    #[tokio::test]
    async fn persistent_rate_limit_gives_up_after_retry_budget() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.rate_limited_starts = usize::MAX;
        let sleeper = Arc::new(RecordingSleeper::default());
        let config = GradingConfig { max_passes: 1, ..GradingConfig::default() };

        let summary = grade_all(&h, Arc::new(fake), sleeper.clone(), config, &["busy.example"]).await;

        assert_eq!(sleeper.waits.lock().unwrap().len(), 4);
        assert_eq!(summary.ungraded, vec!["busy.example".to_string()]);
        assert_eq!(h.ctx.attempts(), 5);
    }

    #[tokio::test]
    async fn cancellation_leaves_ungraded_hosts_untouched() {
        let h = harness();
        let client = Arc::new(FakeClient::new("A"));
        let scheduler = GradingScheduler::new(
            h.ctx.clone(),
            h.store.clone(),
            client.clone(),
            Arc::new(HangingSleeper),
            GradingConfig::default(),
        );
        let (queue, handle) = scheduler.spawn();
        assert!(queue.submit("good.example"));
        while client.started() == 0 {
            tokio::task::yield_now().await;
        }

        h.ctx.cancel_token().cancel();
        drop(queue);
        let summary = handle.await.unwrap();

        assert!(summary.cancelled);
        assert!(summary.graded.is_empty());
        assert_eq!(summary.ungraded, vec!["good.example".to_string()]);
        assert_eq!(h.store.record("good.example").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_submissions_are_graded_once() {
        let h = harness();
        let client = Arc::new(FakeClient::new("A"));

        let summary = grade_all(
            &h,
            client.clone(),
            Arc::new(RecordingSleeper::default()),
            GradingConfig::default(),
            &["good.example", "good.example"],
        )
        .await;

        assert_eq!(summary.graded.len(), 1);
        assert_eq!(client.started(), 1);
    }

    fn waited_secs(sleeper: &RecordingSleeper) -> Vec<u64> {
        sleeper.waits.lock().unwrap().iter().map(Duration::as_secs).collect()
    }

    #[tokio::test]
    async fn service_without_capacity_headers_does_not_stall_grading() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.limit = Some(RateLimit { max: 0, current: 0 });
        let client = Arc::new(fake);
        let sleeper = Arc::new(RecordingSleeper::default());
        let config = GradingConfig { max_passes: 2, max_capacity_waits: 3, ..GradingConfig::default() };

        let summary = grade_all(&h, client.clone(), sleeper.clone(), config, &["a.example", "b.example"]).await;

        assert_eq!(summary.passes, 2);
        assert!(summary.graded.is_empty());
        assert_eq!(summary.ungraded, vec!["a.example".to_string(), "b.example".to_string()]);
        assert!(!summary.cancelled);
        assert_eq!(client.started(), 0);
        // Three backoffs per pass; the second host of each pass is deferred without waiting.
        assert_eq!(waited_secs(&sleeper), vec![30; 6]);
        for host in ["a.example", "b.example"] {
            let record = h.store.record(host).await.unwrap().unwrap();
            assert_eq!(record.verdict(CheckField::GradeCheck), Verdict::Unknown);
        }
    }

    #[tokio::test]
    async fn backs_off_at_capacity_and_dispatches_once_room_frees_up() {
        let h = harness();
        let fake = FakeClient::new("A");
        fake.snapshots.lock().unwrap().push_back(Some(RateLimit { max: 2, current: 2 }));
        let client = Arc::new(fake);
        let sleeper = Arc::new(RecordingSleeper::default());

        let summary =
            grade_all(&h, client.clone(), sleeper.clone(), GradingConfig::default(), &["good.example"]).await;

        assert_eq!(waited_secs(&sleeper), vec![30, 5]);
        assert_eq!(*client.events.lock().unwrap(), vec!["snapshot", "snapshot", "start"]);
        assert_eq!(summary.graded.len(), 1);
        assert_eq!(h.ctx.last_rate_limit(), Some(RateLimit { max: 25, current: 0 }));
    }

    #[tokio::test]
    async fn unreadable_capacity_falls_back_to_one_assessment_at_a_time() {
        let h = harness();
        let fake = FakeClient::new("A");
        fake.snapshots.lock().unwrap().extend([None, None, None]);
        let sleeper = Arc::new(RecordingSleeper::default());

        let summary = grade_all(&h, Arc::new(fake), sleeper.clone(), GradingConfig::default(), &["good.example"]).await;

        assert_eq!(waited_secs(&sleeper), vec![30, 30, 5]);
        assert_eq!(summary.graded.len(), 1);
    }

    #[tokio::test]
    async fn never_overlaps_assessments_while_capacity_is_unknown() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.limit = None;
        fake.script = vec![AssessmentStatus::InProgress];
        let client = Arc::new(fake);
        let hosts = ["a.example", "b.example", "c.example"];

        let summary =
            grade_all(&h, client.clone(), Arc::new(RecordingSleeper::default()), GradingConfig::default(), &hosts).await;

        assert_eq!(client.peak.load(Ordering::SeqCst), 1);
        assert_eq!(summary.graded.len(), 3);
    }

    #[tokio::test]
    async fn failed_assessment_is_graded_in_a_later_pass() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.first_attempt = Fault::ErrorStatus;
        let client = Arc::new(fake);

        let summary = grade_all(
            &h,
            client.clone(),
            Arc::new(RecordingSleeper::default()),
            GradingConfig::default(),
            &["flaky.example"],
        )
        .await;

        assert_eq!(summary.passes, 2);
        assert_eq!(summary.graded, vec![("flaky.example".to_string(), "A".to_string())]);
        assert!(summary.ungraded.is_empty());
        assert_eq!(client.started(), 2);
        let record = h.store.record("flaky.example").await.unwrap().unwrap();
        assert_eq!(record.verdict(CheckField::GradeCheck), Verdict::Pass);
    }

    #[tokio::test]
    async fn poll_error_puts_host_on_retry_list() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.first_attempt = Fault::PollFails;
        let client = Arc::new(fake);

        let summary = grade_all(
            &h,
            client.clone(),
            Arc::new(RecordingSleeper::default()),
            GradingConfig::default(),
            &["flaky.example"],
        )
        .await;

        assert_eq!(summary.passes, 2);
        assert_eq!(summary.graded.len(), 1);
        assert_eq!(client.started(), 2);
    }

    #[tokio::test]
    async fn panicked_task_keeps_its_host_for_the_next_pass() {
        let h = harness();
        let mut fake = FakeClient::new("A");
        fake.first_attempt = Fault::Panics;
        let client = Arc::new(fake);

        let summary = grade_all(
            &h,
            client.clone(),
            Arc::new(RecordingSleeper::default()),
            GradingConfig::default(),
            &["fragile.example"],
        )
        .await;

        assert_eq!(summary.passes, 2);
        assert_eq!(summary.graded, vec![("fragile.example".to_string(), "A".to_string())]);
        assert!(summary.ungraded.is_empty());
    }
}
