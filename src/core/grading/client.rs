// src/core/grading/client.rs

use tracing::{debug, info, warn};

use crate::config::RequestIdentity;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Cached assessments older than this many hours are not reused.
const CACHE_MAX_AGE_HOURS: u32 = 18;
const HEADER_MAX_ASSESSMENTS: &str = "X-Max-Assessments";
const HEADER_CURRENT_ASSESSMENTS: &str = "X-Current-Assessments";

/// Grades from best to worst. Anything not listed ranks below `M`.
const GRADE_ORDER: [&str; 10] = ["A+", "A", "A-", "B", "C", "D", "E", "F", "T", "M"];

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("grading service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("grading service is rate limiting us (HTTP {0})")]
    RateLimited(u16),
    #[error("grading service answered HTTP {0}")]
    Status(u16),
    #[error("unreadable grading response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GradingError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GradingError::RateLimited(_))
    }

    /// False for a response we could not read, which another try is unlikely to fix.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GradingError::Decode(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentStatus {
    Pending,
    InProgress,
    Ready,
    Error,
}

impl AssessmentStatus {
    /// `DNS` and anything unrecognised count as not started yet.
    pub fn from_api(status: &str) -> Self {
        match status {
            "IN_PROGRESS" => AssessmentStatus::InProgress,
            "READY" => AssessmentStatus::Ready,
            "ERROR" => AssessmentStatus::Error,
            _ => AssessmentStatus::Pending,
        }
    }
}

/// The service's advertised concurrency budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub current: u32,
}

impl RateLimit {
    /// Whether one more assessment may start with `in_flight` of ours already running.
    pub fn admits(&self, in_flight: usize) -> bool {
        self.current < self.max && in_flight < self.max as usize
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self { max: read(HEADER_MAX_ASSESSMENTS), current: read(HEADER_CURRENT_ASSESSMENTS) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentHandle {
    pub host: String,
    pub use_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointGrade {
    pub ip_address: String,
    pub grade: Option<String>,
    pub message: Option<String>,
}

/// The result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: AssessmentStatus,
    /// Worst endpoint grade; only set for a READY report where every endpoint is graded.
    pub grade: Option<String>,
    pub message: Option<String>,
    pub endpoints: Vec<EndpointGrade>,
    /// The response body as received, kept as the assessment artifact.
    pub raw: String,
}

#[async_trait]
pub trait GradingClient: Send + Sync {
    async fn start_assessment(&self, host: &str, use_cache: bool) -> Result<AssessmentHandle, GradingError>;

    /// One poll; the caller owns the wait schedule.
    async fn poll(&self, handle: &AssessmentHandle) -> Result<PollOutcome, GradingError>;

    async fn rate_limit_snapshot(&self) -> Result<RateLimit, GradingError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    endpoints: Vec<EndpointResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointResponse {
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
}

fn grade_rank(grade: &str) -> usize {
    GRADE_ORDER.iter().position(|g| *g == grade).unwrap_or(GRADE_ORDER.len())
}

/// The worst of the endpoint grades, or `None` when any endpoint is still ungraded.
pub fn worst_grade(endpoints: &[EndpointGrade]) -> Option<String> {
    if endpoints.is_empty() {
        return None;
    }
    let grades: Option<Vec<&str>> = endpoints.iter().map(|e| e.grade.as_deref()).collect();
    grades?.into_iter().max_by_key(|g| grade_rank(g)).map(str::to_string)
}

/// Client for the SSL Labs assessment API (v3).
pub struct SslLabsClient {
    http: reqwest::Client,
    api_url: String,
}

impl SslLabsClient {
    pub fn new(api_url: &str, identity: RequestIdentity) -> Result<Self, GradingError> {
        let http = reqwest::Client::builder()
            .user_agent(identity.user_agent())
            .timeout(API_TIMEOUT)
            .build()?;
        Ok(Self { http, api_url: api_url.trim_end_matches('/').to_string() })
    }

    async fn analyze(&self, host: &str, extra: &[(&str, String)]) -> Result<PollOutcome, GradingError> {
        let mut query: Vec<(&str, String)> =
            vec![("host", host.to_string()), ("publish", "off".to_string()), ("all", "done".to_string())];
        query.extend(extra.iter().cloned());

        let response = self.http.get(format!("{}/analyze", self.api_url)).query(&query).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 529 {
            warn!(host, status = status.as_u16(), "Grading service is rate limiting.");
            return Err(GradingError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(GradingError::Status(status.as_u16()));
        }

        let raw = response.text().await?;
        let parsed: AnalyzeResponse = serde_json::from_str(&raw)?;
        Ok(outcome_from(parsed, raw))
    }
}

fn outcome_from(parsed: AnalyzeResponse, raw: String) -> PollOutcome {
    let status = AssessmentStatus::from_api(parsed.status.as_deref().unwrap_or_default());
    let endpoints: Vec<EndpointGrade> = parsed
        .endpoints
        .into_iter()
        .map(|e| EndpointGrade {
            ip_address: e.ip_address.unwrap_or_default(),
            grade: e.grade,
            message: e.status_message,
        })
        .collect();
    let grade = if status == AssessmentStatus::Ready { worst_grade(&endpoints) } else { None };
    PollOutcome { status, grade, message: parsed.status_message, endpoints, raw }
}

#[async_trait]
impl GradingClient for SslLabsClient {
    async fn start_assessment(&self, host: &str, use_cache: bool) -> Result<AssessmentHandle, GradingError> {
        let extra = if use_cache {
            vec![("fromCache", "on".to_string()), ("maxAge", CACHE_MAX_AGE_HOURS.to_string())]
        } else {
            vec![("startNew", "on".to_string())]
        };
        let outcome = self.analyze(host, &extra).await?;
        info!(host, use_cache, status = ?outcome.status, "Assessment requested.");
        Ok(AssessmentHandle { host: host.to_string(), use_cache })
    }

    async fn poll(&self, handle: &AssessmentHandle) -> Result<PollOutcome, GradingError> {
        let extra = if handle.use_cache {
            vec![("fromCache", "on".to_string()), ("maxAge", CACHE_MAX_AGE_HOURS.to_string())]
        } else {
            Vec::new()
        };
        let outcome = self.analyze(&handle.host, &extra).await?;
        debug!(host = %handle.host, status = ?outcome.status, grade = ?outcome.grade, "Polled assessment.");
        Ok(outcome)
    }

    async fn rate_limit_snapshot(&self) -> Result<RateLimit, GradingError> {
        let response = self.http.head(format!("{}/info", self.api_url)).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 529 {
            return Err(GradingError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(GradingError::Status(status.as_u16()));
        }
        let limit = RateLimit::from_headers(response.headers());
        debug!(max = limit.max, current = limit.current, "Read grading capacity.");
        Ok(limit)
    }
}
