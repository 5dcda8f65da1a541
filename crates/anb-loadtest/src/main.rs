//! # ANB Video API Load Test CLI
//!
//! ```bash
//! # Staged ramp
//! anb-loadtest --base-url http://backend:8080 --total-steps 10 --vus-increment 50
//!
//! # Stress preset, results exported for later comparison
//! anb-loadtest --preset stress --output results.json --prometheus-output results.prom
//!
//! # Preview the ramp without sending traffic
//! anb-loadtest profile --total-steps 5 --step-duration 30s
//!
//! # Functional pass over every endpoint
//! anb-loadtest smoke --base-url http://backend:8080
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anb_loadtest::dispatcher::parse_weights;
use anb_loadtest::prelude::*;
use anb_loadtest::run_smoke;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "anb-loadtest")]
#[command(version)]
#[command(about = "Staged-ramp load generator for the ANB video API", long_about = None)]
struct Cli {
    /// Without a subcommand the staged load test runs
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sequential functional pass over every endpoint
    Smoke(CommonArgs),

    /// Print the load profile without sending traffic
    Profile(CommonArgs),
}

/// Configuration sources shared by every command
#[derive(Args, Clone)]
struct CommonArgs {
    /// Built-in configuration the other sources layer over
    #[arg(long, value_enum, default_value = "capacity")]
    preset: Preset,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the API under test
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Number of ramp stages
    #[arg(long, env = "TOTAL_STEPS")]
    total_steps: Option<u64>,

    /// Virtual users added per stage
    #[arg(long, env = "VUS_INCREMENT")]
    vus_increment: Option<u64>,

    /// Duration of each stage, e.g. "30s" or "5m"
    #[arg(long, env = "STEP_DURATION", value_parser = humantime::parse_duration)]
    step_duration: Option<Duration>,

    /// Host prepended to relative processed-video URLs
    #[arg(long, env = "VIDEO_ASSETS_URL")]
    video_assets_url: Option<String>,

    /// Seed for reproducible random choices
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Scenario weights, e.g. "voter=0.4,uploader=0.3,new-registrant=0.3"
    #[arg(long)]
    weights: Option<String>,

    /// Threshold such as "http_req_duration:p95<2000"; replaces the defaults, repeatable
    #[arg(long = "threshold")]
    thresholds: Vec<String>,

    /// Delete every uploaded video once it is listed
    #[arg(long)]
    delete_after_upload: bool,

    /// Prefix for exported metric names
    #[arg(long)]
    metrics_prefix: Option<String>,

    /// Output results to JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output final metrics in Prometheus text format
    #[arg(long)]
    prometheus_output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    info!("ANB Video API Load Test Tool v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Some(Commands::Smoke(args)) => smoke(args).await,
        Some(Commands::Profile(args)) => print_profile(args),
        None => run_load_test(cli.run).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<LoadTestError>()
                .map(LoadTestError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Preset, then file, then flags and environment
fn build_config(args: &CommonArgs) -> anyhow::Result<LoadTestConfig> {
    let preset = LoadTestConfig::preset(args.preset);
    let mut config = match &args.config {
        Some(path) => LoadTestConfig::load_over(&preset, path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => preset,
    };

    if let Some(base_url) = &args.base_url {
        config.target.base_url = base_url.clone();
    }
    if let Some(asset_url) = &args.video_assets_url {
        config.target.asset_base_url = Some(asset_url.clone());
    }
    if let Some(total_steps) = args.total_steps {
        config.ramp.total_steps = total_steps;
    }
    if let Some(vus_increment) = args.vus_increment {
        config.ramp.vus_increment = vus_increment;
    }
    if let Some(step_duration) = args.step_duration {
        config.ramp.step_duration = step_duration;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    Ok(config)
}

fn build_run_config(args: &RunArgs) -> anyhow::Result<LoadTestConfig> {
    let mut config = build_config(&args.common)?;

    if let Some(weights) = &args.weights {
        config.scenarios.weights = parse_weights(weights)?;
    }
    if !args.thresholds.is_empty() {
        config.thresholds = args
            .thresholds
            .iter()
            .map(|t| t.parse::<Threshold>())
            .collect::<Result<Vec<_>>>()?;
    }
    if args.delete_after_upload {
        config.scenarios.delete_after_upload = true;
    }
    if args.metrics_prefix.is_some() {
        config.metrics.prefix = args.metrics_prefix.clone();
    }
    Ok(config)
}

async fn run_load_test(args: RunArgs) -> anyhow::Result<bool> {
    let config = build_run_config(&args)?;
    let runner = LoadTestRunner::new(config)?;

    let summary = runner.run().await;
    summary.print_report();

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Results saved to {}", path.display());
    }
    if let Some(path) = &args.prometheus_output {
        let text = summary.metrics.to_prometheus()?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        info!("Prometheus metrics saved to {}", path.display());
    }

    Ok(summary.passed())
}

async fn smoke(args: CommonArgs) -> anyhow::Result<bool> {
    let config = build_config(&args)?;
    let report = run_smoke(&config).await?;
    report.print_report();
    Ok(report.passed())
}

fn print_profile(args: CommonArgs) -> anyhow::Result<bool> {
    let config = build_config(&args)?;
    let profile = config.profile()?;

    println!("\n═══════════════════════════════════════════════════════════════");
    println!("                      LOAD PROFILE");
    println!("═══════════════════════════════════════════════════════════════");
    println!("{:>8} {:>12} {:>14} {:>14}", "Stage", "VUs", "Duration", "Starts at");
    println!("───────────────────────────────────────────────────────────────");

    let mut starts_at = Duration::ZERO;
    for (i, stage) in profile.stages().iter().enumerate() {
        println!(
            "{:>8} {:>12} {:>14} {:>14}",
            i + 1,
            stage.target_concurrency,
            humantime::format_duration(stage.duration).to_string(),
            humantime::format_duration(starts_at).to_string()
        );
        starts_at += stage.duration;
    }

    println!("───────────────────────────────────────────────────────────────");
    println!(
        "  {} stages, peak {} VUs, total {}",
        profile.len(),
        profile.peak_concurrency(),
        humantime::format_duration(profile.total_duration())
    );
    println!("═══════════════════════════════════════════════════════════════\n");
    Ok(true)
}
