//! Top-level handle
//!
//! [`FeedAggregator`] owns the database, the scheduler and the event channel.
//! Embedders create one, register sources, start the scheduler and subscribe
//! to events; [`shutdown`](FeedAggregator::shutdown) stops polling after the
//! current cycle and closes the database.

use crate::config::Config;
use crate::db::{Database, NewSource};
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::parser::{DocumentParser, SyndicationParser};
use crate::scheduler::FeedScheduler;
use crate::store::FeedStore;
use crate::types::{CycleReport, Event, Source};
use crate::worker::SourceWorker;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Scheduled feed poller
pub struct FeedAggregator {
    config: Arc<Config>,
    db: Arc<Database>,
    scheduler: Arc<FeedScheduler>,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FeedAggregator {
    /// Create an aggregator with the SQLite store, HTTP fetcher and default
    /// parser
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, the database cannot be
    /// opened or migrated, or the HTTP client cannot be built.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.database_path).await?);
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout, &config.user_agent)?);

        Self::with_components(
            config,
            db.clone(),
            db,
            fetcher,
            Arc::new(SyndicationParser),
        )
    }

    /// Create an aggregator from explicit collaborators
    ///
    /// `store` is what the polling core talks to; `db` is kept for
    /// registration, lookups and closing on shutdown. They are usually the
    /// same database.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn with_components(
        config: Config,
        db: Arc<Database>,
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn DocumentParser>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let worker = Arc::new(SourceWorker::new(
            store.clone(),
            fetcher,
            parser,
            config.store_timeout,
        ));
        let scheduler = Arc::new(FeedScheduler::new(
            store,
            worker,
            &config,
            event_tx.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            scheduler,
            event_tx,
            cancel_token: CancellationToken::new(),
            scheduler_handle: Mutex::new(None),
        })
    }

    /// Subscribe to scheduler events
    ///
    /// Receivers that fall behind lose the oldest events; they never slow the
    /// scheduler down.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the underlying database
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Register a new source
    ///
    /// # Errors
    /// Returns [`Error::InvalidUrl`] for a non-http(s) URL, or a uniqueness
    /// violation if the URL is already registered.
    pub async fn register_source(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Source> {
        let source = self
            .db
            .insert_source(NewSource {
                name: name.into(),
                url: url.into(),
            })
            .await?;
        tracing::info!(source = %source.name, url = %source.url, "Registered source");
        Ok(source)
    }

    /// Spawn the polling loop in the background
    ///
    /// Calling this while the loop is already running does nothing.
    ///
    /// # Errors
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn start_scheduler(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut handle = self.scheduler_handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("Feed scheduler already running");
            return Ok(());
        }

        let scheduler = self.scheduler.clone();
        let cancel_token = self.cancel_token.clone();
        *handle = Some(tokio::spawn(scheduler.run(cancel_token)));
        Ok(())
    }

    /// Run one polling cycle now and wait for it
    ///
    /// Waits for any cycle already in progress to finish first.
    ///
    /// # Errors
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown), or
    /// the selection error if the cycle was skipped.
    pub async fn poll_now(&self) -> Result<CycleReport> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        self.scheduler.run_cycle().await
    }

    /// Stop polling and close the database
    ///
    /// A cycle already in progress, scheduled or started by
    /// [`poll_now`](Self::poll_now), runs to completion first; no fetch is
    /// aborted midway.
    ///
    /// # Errors
    /// Currently infallible; the result is kept for forward compatibility
    /// with shutdown steps that can fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.cancel_token.cancel();

        let handle = self.scheduler_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Feed scheduler task ended abnormally");
            } else {
                tracing::info!("Feed scheduler stopped after its last cycle");
            }
        }

        self.scheduler.close().await;
        self.db.close().await;
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
