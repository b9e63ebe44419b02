//! CloudFront Gate Agent CLI.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_agent_cloudfront_gate::{CloudFrontGate, Config};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-cloudfront-gate")]
#[command(about = "CloudFront gate agent for Zentinel - only admit requests from CloudFront edge ranges")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cloudfront-gate.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Print the decision for each origin (e.g. "203.0.113.9:443") and exit
    #[arg(long, value_name = "ORIGIN", num_args = 1..)]
    check: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let gate = CloudFrontGate::new(config).await?;

    // Handle --check
    if !args.check.is_empty() {
        for origin in &args.check {
            let decision = gate.decide(origin);
            match decision.status_code() {
                Some(status) => println!("{}\treject\t{}", origin, status),
                None => println!("{}\tallow", origin),
            }
        }
        gate.shutdown().await;
        return Ok(());
    }

    let snapshot = gate.store().snapshot();
    info!(
        trusted_ranges = snapshot.len(),
        "CloudFront gate running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    gate.shutdown().await;

    Ok(())
}
