// src/core/grading/mod.rs

// External TLS grading: the service client and the scheduler that drives it.
pub mod client;
pub mod clock;
pub mod scheduler;

pub use client::{
    AssessmentHandle, AssessmentStatus, GradingClient, GradingError, PollOutcome, RateLimit, SslLabsClient,
};
pub use clock::{Sleeper, TokioSleeper};
pub use scheduler::{GradingConfig, GradingQueue, GradingScheduler, GradingSummary};
