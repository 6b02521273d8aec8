//! Headless feed poller
//!
//! Usage: `feed-aggregator [CONFIG.json]`
//!
//! Without a config file, settings come from the environment (a `.env` file
//! in the working directory is loaded first). Log verbosity follows
//! `RUST_LOG`, defaulting to `info`.

use feed_aggregator::{Config, FeedAggregator, run_with_shutdown};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration file");
            Config::from_file(&path)?
        }
        None => Config::from_env()?,
    };

    tracing::info!(
        database = %config.database_path.display(),
        interval_secs = config.poll_interval.as_secs(),
        concurrency = config.concurrency,
        "Starting feed aggregator"
    );

    let aggregator = FeedAggregator::new(config).await?;
    aggregator.start_scheduler().await?;
    run_with_shutdown(aggregator).await?;

    Ok(())
}
