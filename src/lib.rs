//! # feed-aggregator
//!
//! Scheduled RSS/Atom feed poller backed by SQLite.
//!
//! Every polling cycle picks the sources that have waited longest since their
//! last attempt (never-attempted sources first), fetches them in parallel up to
//! a fixed concurrency limit, parses the documents and stores entries that have
//! not been seen before. Re-fetching a source is idempotent: entries are keyed
//! by (source, URL) and duplicates are skipped silently.
//!
//! Failures stay local. A source that cannot be reached, returns garbage, or
//! contains an entry the store rejects is logged and reported through
//! [`Event`]s; its siblings and the next cycle are unaffected.
//!
//! ## Quick Start
//!
//! ```no_run
//! use feed_aggregator::{Config, FeedAggregator, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aggregator = FeedAggregator::new(Config::default()).await?;
//!     aggregator
//!         .register_source("Example", "https://example.com/rss.xml")
//!         .await?;
//!
//!     let mut events = aggregator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     aggregator.start_scheduler().await?;
//!     run_with_shutdown(aggregator).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Top-level aggregator handle
pub mod aggregator;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Feed retrieval
pub mod fetch;
/// Feed document parsing
pub mod parser;
/// Entry reconciliation
pub mod reconciler;
/// Polling cycles
pub mod scheduler;
/// Store interface used by the polling core
pub mod store;
/// Core types and events
pub mod types;
/// Single-source poll attempts
pub mod worker;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use aggregator::FeedAggregator;
pub use config::Config;
pub use db::{Database, NewEntry, NewSource};
pub use error::{DatabaseError, Error, NetworkError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use parser::{DocumentParser, ParsedFeed, ParsedItem, SyndicationParser};
pub use scheduler::FeedScheduler;
pub use store::FeedStore;
pub use types::{
    CycleReport, Entry, EntryId, Event, PollOutcome, PollStage, Source, SourceId,
};
pub use worker::SourceWorker;

/// Run the aggregator until the process is asked to stop.
///
/// Waits for a termination signal and then calls
/// [`FeedAggregator::shutdown`], which lets the current cycle finish.
///
/// - **Unix:** SIGTERM or SIGINT. If a handler cannot be registered, the other
///   one is used; if neither can, falls back to `tokio::signal::ctrl_c()`.
/// - **Windows/other:** Ctrl+C.
///
/// # Example
///
/// ```no_run
/// use feed_aggregator::{Config, FeedAggregator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let aggregator = FeedAggregator::new(Config::default()).await?;
///     aggregator.start_scheduler().await?;
///     run_with_shutdown(aggregator).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(aggregator: FeedAggregator) -> Result<()> {
    wait_for_signal().await;
    aggregator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    } else {
        tracing::info!("Received Ctrl+C signal");
    }
}
