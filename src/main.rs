//! ringtrack: batch runner for storage-ring collective-effects tracking

use anyhow::{Context, Result};
use clap::Parser;
use ringtrack::{run, write_report, Config};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ringtrack")]
#[command(about = "Track multi-bunch collective effects in an electron storage ring")]
#[command(version)]
struct Args {
    /// JSON run configuration
    config: PathBuf,

    /// Directory for the SDDS tables and summary.json
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Override the number of turns
    #[arg(long)]
    turns: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter (e.g. info, debug, ringtrack=trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).context("Invalid log filter")?)
        .init();

    let json = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Failed to read config file: {:?}", args.config))?;
    let mut config: Config = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse config file: {:?}", args.config))?;
    if let Some(turns) = args.turns {
        config.run.turns = turns;
        if let Some(window) = config.run.growth_fit {
            if window.end > turns {
                config.run.growth_fit = None;
            }
        }
    }
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    config.validate().context("Invalid configuration")?;

    let report = run(&config).context("Tracking failed")?;

    let written = write_report(&report, &config.run.track_bunches, &args.output)
        .with_context(|| format!("Failed to write output to {:?}", args.output))?;
    for path in &written {
        info!("Wrote {:?}", path);
    }

    Ok(())
}
