//! Receipt grid verification entry point
//!
//! Exit status: 0 when every scenario passed, 1 when the application failed a
//! check, 2 when the harness itself could not run.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use receipt_grid_e2e::runner::RunnerConfig;
use receipt_grid_e2e::{E2eResult, VerificationRunner, VerifyConfig};

#[derive(Parser, Debug)]
#[command(name = "verify-receipt-grid")]
#[command(about = "Verify the receipt upload grid in a running web client")]
#[command(version)]
struct Args {
    /// Configuration file (missing file = defaults)
    #[arg(short, long, default_value = "verify.toml", env = "VERIFY_CONFIG")]
    config: PathBuf,

    /// Application URL, overrides the config file
    #[arg(long, env = "VERIFY_APP_URL")]
    url: Option<String>,

    /// Scenario YAML file or directory instead of the built-in scenario
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Only run scenarios with this tag (with --scenario)
    #[arg(short, long)]
    tag: Option<String>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long)]
    browser: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Compare the screenshot against the stored baseline
    #[arg(long)]
    visual: bool,

    /// Replace the stored baseline with this run's screenshot
    #[arg(long)]
    update_baseline: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}

fn build_config(args: &Args) -> E2eResult<RunnerConfig> {
    let mut file_config = VerifyConfig::load(&args.config)?;

    if let Some(url) = &args.url {
        file_config.app.url = url.clone();
    }
    if let Some(browser) = &args.browser {
        file_config.browser.kind = browser.parse()?;
    }
    if args.headed {
        file_config.browser.headless = false;
    }
    if args.visual || args.update_baseline {
        file_config.visual.enabled = true;
    }

    let working_dir = std::env::current_dir()?;
    Ok(file_config.into_runner_config(working_dir))
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let config = build_config(&args)?;
    let mut runner = VerificationRunner::new(config);

    let specs = runner.select_specs(args.scenario.as_deref(), args.tag.as_deref())?;
    let reports = runner.run_specs(&specs).await?;

    if args.update_baseline {
        for report in &reports {
            if report.success || report.visual.is_some() {
                runner.update_baseline(report)?;
            } else {
                warn!("Keeping baseline for {}: the scenario did not reach its screenshot", report.name);
            }
        }
    }

    runner.stop_server()?;
    Ok(reports.iter().all(|r| r.success))
}
