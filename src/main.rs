// src/main.rs

use chrono::Local;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing::warn;

use scirtscan::app::{App, export_results};
use scirtscan::config::{DEFAULT_API_URL, DEFAULT_REMNANTS_FILE, GradingMode, RequestIdentity, Settings};
use scirtscan::core::context::prepare_output_dir;
use scirtscan::core::grading::GradingConfig;
use scirtscan::core::hosts::read_host_list;
use scirtscan::core::scanner::testssl_scanner::DEFAULT_TESTSSL_PATH;
use scirtscan::logging;

/// Checks a list of websites against a baseline of web security practices.
#[derive(Parser, Debug)]
#[command(name = "scirtscan", version, about)]
struct Cli {
    /// File with one host per line; lines starting with '#' are ignored
    #[arg(required_unless_present = "export")]
    filename: Option<PathBuf>,

    /// Print an existing result database as a semicolon-separated table and exit
    #[arg(long, value_name = "DATABASE", conflicts_with = "filename")]
    export: Option<PathBuf>,

    /// Also write a verbose debug.log into the run directory
    #[arg(long)]
    debug: bool,

    /// Use the external grading service: on, off, or only (skip the other checks)
    #[arg(long, value_enum, default_value_t = GradingMode::On)]
    grading: GradingMode,

    /// Grade with a local testssl.sh instead of the external service
    #[arg(long)]
    local_grading: bool,

    #[arg(long, default_value = DEFAULT_TESTSSL_PATH)]
    testssl_path: PathBuf,

    /// Do not accept cached grading results
    #[arg(long)]
    fresh: bool,

    /// Send browser-like request headers instead of identifying the scanner
    #[arg(long)]
    anonymous: bool,

    /// File with installer remnant file names to probe for
    #[arg(long, default_value = DEFAULT_REMNANTS_FILE)]
    remnants: PathBuf,

    /// Directory under which the date-stamped run directory is created
    #[arg(long, default_value = ".")]
    output_root: PathBuf,

    /// Maximum number of grading passes
    #[arg(long, default_value_t = 10)]
    max_passes: u32,

    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
}

impl Cli {
    fn into_settings(self) -> Settings {
        let grading_config =
            GradingConfig { use_cache: !self.fresh, max_passes: self.max_passes.max(1), ..GradingConfig::default() };
        Settings {
            input: self.filename.unwrap_or_default(),
            output_root: self.output_root,
            remnants: self.remnants,
            debug: self.debug,
            grading: self.grading,
            local_grading: self.local_grading,
            testssl_path: self.testssl_path,
            identity: if self.anonymous { RequestIdentity::Anonymous } else { RequestIdentity::Identified },
            api_url: self.api_url,
            grading_config,
            ..Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    if let Some(database) = &cli.export {
        logging::initialize_logging(None)?;
        export_results(database, &mut std::io::stdout().lock()).await?;
        return Ok(());
    }
    let settings = cli.into_settings();

    let hosts = read_host_list(&settings.input)
        .wrap_err_with(|| format!("cannot read host list {}", settings.input.display()))?;
    let output_dir =
        prepare_output_dir(&settings.output_root, Local::now()).wrap_err("cannot create output directory")?;
    logging::initialize_logging(settings.debug.then_some(output_dir.as_path()))?;

    let app = App::new(settings, output_dir);
    let cancel = app.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting in-flight work wind down.");
            cancel.cancel();
        }
    });

    let report = app.run(&hosts).await?;
    println!("{}", report.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_does_not_need_a_host_list() {
        let cli = Cli::try_parse_from(["scirtscan", "--export", "20261019/websites.db"]).unwrap();
        assert_eq!(cli.export, Some(PathBuf::from("20261019/websites.db")));
        assert_eq!(cli.filename, None);
    }

    #[test]
    fn scanning_needs_a_host_list() {
        assert!(Cli::try_parse_from(["scirtscan", "--debug"]).is_err());
        assert!(Cli::try_parse_from(["scirtscan", "hosts.txt", "--export", "websites.db"]).is_err());

        let settings = Cli::try_parse_from(["scirtscan", "hosts.txt", "--fresh"]).unwrap().into_settings();
        assert_eq!(settings.input, PathBuf::from("hosts.txt"));
        assert!(!settings.grading_config.use_cache);
    }
}
