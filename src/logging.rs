// src/logging.rs

use color_eyre::eyre::Result;
use lazy_static::lazy_static;
use std::path::Path;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{self, EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase().to_string();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", PROJECT_NAME.clone());
}

/// Name of the verbose log written into the run directory with `--debug`.
pub const DEBUG_LOG_FILE: &str = "debug.log";

/// `RUST_LOG` wins, then `<CRATE>_LOGLEVEL`, then our own crate at `info` (or `debug`).
pub fn log_filter(verbose: bool) -> String {
    std::env::var("RUST_LOG").or_else(|_| std::env::var(LOG_ENV.clone())).unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        format!("{}={}", env!("CARGO_CRATE_NAME"), level)
    })
}

/// Logs to stderr and, when `debug_dir` is given, also to a plain-text `debug.log` there.
pub fn initialize_logging(debug_dir: Option<&Path>) -> Result<()> {
    let timer = LocalTime::new(format_description!("[hour]:[minute]:[second]"));

    let stderr_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(timer.clone())
        .with_filter(EnvFilter::new(log_filter(false)));

    let file_subscriber = match debug_dir {
        Some(dir) => {
            let log_file = std::fs::File::create(dir.join(DEBUG_LOG_FILE))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(log_file)
                    .with_target(true)
                    .with_ansi(false)
                    .with_timer(timer)
                    .with_filter(EnvFilter::new(log_filter(true))),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_subscriber)
        .with(file_subscriber)
        .with(ErrorLayer::default())
        .init();

    Ok(())
}
