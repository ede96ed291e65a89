use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use typhoon::loadgen::{
    DEFAULT_REQUESTS, DEFAULT_SLACK, DEFAULT_TARGET, LoadConfig, LoadGenerator,
};

/// Fires a fixed number of concurrent GET requests at a target.
#[derive(Parser, Debug)]
#[command(name = "loadgen", version)]
struct Args {
    /// URL to request
    #[arg(long, env = "TYPHOON_TARGET", default_value = DEFAULT_TARGET)]
    target: String,

    /// Total requests, split evenly across workers
    #[arg(long, env = "TYPHOON_REQUESTS", default_value_t = DEFAULT_REQUESTS)]
    requests: u64,

    /// Worker threads; defaults to the number of CPUs
    #[arg(long)]
    workers: Option<usize>,

    /// Completions a worker may be short of its budget and still halt
    #[arg(long, default_value_t = DEFAULT_SLACK)]
    slack: u64,

    /// How often workers check their completion count
    #[arg(long, default_value_t = 200)]
    check_interval_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("typhoon=debug,info")),
        )
        .with_thread_names(true)
        .init();

    let args = Args::parse();

    let mut config = LoadConfig::new(&args.target, args.requests)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.slack = args.slack;
    config.check_interval = Duration::from_millis(args.check_interval_ms);

    LoadGenerator::new(config)?.run()?;
    Ok(())
}
