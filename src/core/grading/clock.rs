// src/core/grading/clock.rs

use async_trait::async_trait;
use std::time::Duration;

/// Every wait in the grading loop goes through this, so tests can run the
/// polling cadence without real time passing.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
