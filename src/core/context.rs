// src/core/context.rs

use crate::core::grading::RateLimit;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;

/// Format of the `check_date` column and the report headers.
pub const CHECK_DATE_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Process-wide state for one invocation, handed explicitly to the orchestrator and
/// the grading scheduler. Nothing in here is persisted.
#[derive(Debug)]
pub struct RunContext {
    output_dir: PathBuf,
    rate_limit: Mutex<Option<RateLimit>>,
    passes: AtomicU32,
    attempts: AtomicU32,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(output_dir: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            output_dir: output_dir.into(),
            rate_limit: Mutex::new(None),
            passes: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            cancel,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn record_rate_limit(&self, limit: RateLimit) {
        *self.rate_limit.lock().unwrap_or_else(|p| p.into_inner()) = Some(limit);
    }

    pub fn last_rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn begin_pass(&self, pass: u32) {
        self.passes.store(pass, Ordering::SeqCst);
    }

    pub fn passes(&self) -> u32 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn count_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub fn check_date(now: DateTime<Local>) -> String {
    now.format(CHECK_DATE_FORMAT).to_string()
}

/// Creates `<root>/YYYYMMDD` for the run and returns it.
pub fn prepare_output_dir(root: &Path, today: DateTime<Local>) -> std::io::Result<PathBuf> {
    let dir = root.join(today.format("%Y%m%d").to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
