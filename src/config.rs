// src/config.rs

//! Run configuration, built from the command line in `main.rs`.

use crate::core::grading::GradingConfig;
use crate::core::scanner::testssl_scanner::DEFAULT_TESTSSL_PATH;
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.ssllabs.com/api/v3";
pub const DEFAULT_REMNANTS_FILE: &str = "remnants.txt";

/// Which headers outgoing requests carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestIdentity {
    /// Announce the scanner honestly.
    #[default]
    Identified,
    /// Look like an ordinary browser.
    Anonymous,
}

impl RequestIdentity {
    pub fn user_agent(self) -> &'static str {
        match self {
            RequestIdentity::Identified => concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"), " (compliance scan)"),
            RequestIdentity::Anonymous => {
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
            }
        }
    }
}

/// Whether, and how exclusively, the external grading service is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GradingMode {
    /// Run all checks and grade.
    #[default]
    On,
    /// Run all checks, no grading.
    Off,
    /// Only the gates and grading.
    Only,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub input: PathBuf,
    pub output_root: PathBuf,
    pub remnants: PathBuf,
    pub debug: bool,
    pub grading: GradingMode,
    pub local_grading: bool,
    pub testssl_path: PathBuf,
    pub testssl_timeout: Duration,
    pub identity: RequestIdentity,
    pub api_url: String,
    pub grading_config: GradingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output_root: PathBuf::from("."),
            remnants: PathBuf::from(DEFAULT_REMNANTS_FILE),
            debug: false,
            grading: GradingMode::On,
            local_grading: false,
            testssl_path: PathBuf::from(DEFAULT_TESTSSL_PATH),
            testssl_timeout: Duration::from_secs(600),
            identity: RequestIdentity::Identified,
            api_url: DEFAULT_API_URL.to_string(),
            grading_config: GradingConfig::default(),
        }
    }
}

impl Settings {
    /// The external scheduler runs unless grading is off or done locally.
    pub fn uses_external_grading(&self) -> bool {
        self.grading != GradingMode::Off && !self.local_grading
    }

    pub fn uses_local_grading(&self) -> bool {
        self.grading != GradingMode::Off && self.local_grading
    }

    pub fn grading_only(&self) -> bool {
        self.grading == GradingMode::Only
    }
}
