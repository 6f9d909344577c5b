//! attrib-pipeline - Channel attribution pipeline entry point
//!
//! Reads sessions and conversions for a date window, builds customer
//! journeys, scores them against the remote attribution service, and writes
//! the per-channel report to the store and to CSV.

use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use attrib_common::config::{resolve_database_path, TomlConfig};
use attrib_pipeline::pipeline::{self, PipelineConfig};
use attrib_pipeline::scoring::{ScoringConfig, DEFAULT_CHUNK_SIZE};
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for attrib-pipeline
#[derive(Parser, Debug)]
#[command(name = "attrib-pipeline")]
#[command(about = "Channel attribution pipeline")]
#[command(version)]
struct Args {
    /// Path to the SQLite store (falls back to env, config file, OS default)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// First day of the run window, YYYY-MM-DD
    #[arg(long)]
    start_date: NaiveDate,

    /// Last day of the run window, YYYY-MM-DD
    #[arg(long)]
    end_date: NaiveDate,

    /// Where to write the CSV report
    #[arg(long, default_value = "channel_report.csv")]
    output: PathBuf,

    /// Maximum journeys per scoring request
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Scoring service endpoint
    #[arg(long, env = "ATTRIB_SCORING_ENDPOINT")]
    endpoint: Option<String>,

    /// Scoring service API key
    #[arg(long, env = "ATTRIB_API_KEY")]
    api_key: Option<String>,

    /// Scoring request quota per second
    #[arg(long, default_value_t = 1)]
    requests_per_second: u32,

    /// Attempts per chunk before giving up
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attrib_pipeline=info,attrib_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.start_date > args.end_date {
        bail!(
            "start_date ({}) is after end_date ({})",
            args.start_date,
            args.end_date
        );
    }
    if args.chunk_size == 0 {
        bail!("chunk_size must be at least 1");
    }

    let file_config = TomlConfig::load().context("Failed to load config file")?;
    let db_path = resolve_database_path(args.db_path.as_ref(), &file_config);

    let endpoint = args
        .endpoint
        .or(file_config.scoring.endpoint)
        .unwrap_or_default();
    let api_key = args
        .api_key
        .or(file_config.scoring.api_key)
        .unwrap_or_default();

    let requests_per_second = NonZeroU32::new(args.requests_per_second)
        .context("requests_per_second must be at least 1")?;

    let config = PipelineConfig {
        db_path,
        start_date: args.start_date,
        end_date: args.end_date,
        output_path: args.output,
        scoring: ScoringConfig {
            endpoint,
            api_key,
            chunk_size: args.chunk_size,
            max_attempts: args.max_attempts,
            requests_per_second,
            ..Default::default()
        },
    };

    info!(
        db_path = %config.db_path.display(),
        output = %config.output_path.display(),
        "Starting attrib-pipeline v{}",
        env!("CARGO_PKG_VERSION")
    );

    let summary = pipeline::run(&config)
        .await
        .context("Pipeline run failed")?;

    info!(
        attributed = summary.attributed,
        skipped = summary.skipped_no_sessions,
        failed = summary.failed_remote + summary.failed_validation,
        "Done"
    );

    Ok(())
}
