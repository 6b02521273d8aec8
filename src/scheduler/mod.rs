//! Polling cycles
//!
//! Each cycle selects up to `concurrency` sources, least recently attempted
//! first (never-attempted sources ahead of everything), runs one
//! [`SourceWorker`] per source in parallel, and waits for the whole batch
//! before the next selection. The batch barrier is what bounds the number of
//! in-flight fetches and keeps two workers off the same source.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{FeedStore, with_store_timeout};
use crate::types::{CycleReport, Event, PollOutcome, PollStage, Source};
use crate::worker::SourceWorker;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives polling cycles on a fixed interval
pub struct FeedScheduler {
    store: Arc<dyn FeedStore>,
    worker: Arc<SourceWorker>,
    poll_interval: Duration,
    concurrency: usize,
    store_timeout: Duration,
    event_tx: broadcast::Sender<Event>,
    /// Held for the whole of a cycle so manual and scheduled cycles never overlap
    cycle_lock: Mutex<()>,
    cycles: AtomicU64,
    closed: AtomicBool,
}

impl FeedScheduler {
    /// Create a scheduler using the interval, concurrency and store timeout
    /// from `config`
    pub fn new(
        store: Arc<dyn FeedStore>,
        worker: Arc<SourceWorker>,
        config: &Config,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            store,
            worker,
            poll_interval: config.poll_interval,
            concurrency: config.concurrency,
            store_timeout: config.store_timeout,
            event_tx,
            cycle_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of cycles started so far, including skipped ones
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Refuse new cycles and wait for the running one, if any, to finish
    ///
    /// Cycles queued behind the running one return [`Error::ShuttingDown`]
    /// without touching the store.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _guard = self.cycle_lock.lock().await;
        debug!("Feed scheduler closed");
    }

    /// Run cycles until `cancel_token` fires
    ///
    /// The first cycle starts immediately. Ticks missed while a slow cycle is
    /// running are skipped rather than bunched up. Cancellation is only
    /// observed between cycles: a cycle already in progress runs to
    /// completion.
    pub async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            concurrency = self.concurrency,
            "Feed scheduler started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Selection failures are already logged and announced
                    let _ = self.run_cycle().await;
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }

        info!("Feed scheduler stopped");
    }

    /// Run a single polling cycle and wait for all of its workers
    ///
    /// # Errors
    /// Returns the selection error if due sources could not be listed. The
    /// cycle is skipped in that case; nothing else in a cycle can fail.
    /// Returns [`Error::ShuttingDown`] once [`close`](Self::close) was called.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();

        let selected = with_store_timeout(
            "list_sources_due_for_fetch",
            self.store_timeout,
            self.store.list_sources_due_for_fetch(self.concurrency),
        )
        .await;

        let mut sources = match selected {
            Ok(sources) => sources,
            Err(e) => {
                error!(cycle, error = %e, "Failed to select sources to fetch, skipping cycle");
                self.event_tx
                    .send(Event::CycleSkipped {
                        cycle,
                        error: e.to_string(),
                    })
                    .ok();
                return Err(e);
            }
        };

        if sources.len() > self.concurrency {
            warn!(
                cycle,
                returned = sources.len(),
                limit = self.concurrency,
                "Store returned more sources than requested, truncating"
            );
            sources.truncate(self.concurrency);
        }

        info!(cycle, "Found {} sources to fetch", sources.len());
        self.event_tx
            .send(Event::CycleStarted {
                cycle,
                sources: sources.len(),
            })
            .ok();

        let mut report = CycleReport {
            cycle,
            sources_selected: sources.len(),
            ..Default::default()
        };

        let mut workers = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(sources.len());
        for source in sources {
            let worker = self.worker.clone();
            let task_source = source.clone();
            let handle = workers.spawn(async move {
                let outcome = worker.poll(&task_source).await;
                (task_source, outcome)
            });
            in_flight.insert(handle.id(), source);
        }

        while let Some(joined) = workers.join_next().await {
            let (source, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    let Some(source) = in_flight.get(&e.id()).cloned() else {
                        error!(cycle, error = %e, "Lost track of a finished worker");
                        continue;
                    };
                    error!(
                        cycle,
                        source = %source.name,
                        source_id = %source.id,
                        error = %e,
                        "Worker for source {} did not finish",
                        source.name
                    );
                    let outcome = PollOutcome::Failed {
                        stage: PollStage::Worker,
                        reason: e.to_string(),
                    };
                    (source, outcome)
                }
            };

            report.record(&outcome);
            self.announce(cycle, &source, outcome);
        }

        report.duration = started.elapsed();
        debug!(
            cycle,
            completed = report.sources_completed,
            failed = report.sources_failed,
            inserted = report.entries_inserted,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "Cycle finished"
        );
        self.event_tx
            .send(Event::CycleCompleted {
                report: report.clone(),
            })
            .ok();

        Ok(report)
    }

    fn announce(&self, cycle: u64, source: &Source, outcome: PollOutcome) {
        self.event_tx
            .send(Event::SourcePolled {
                cycle,
                source_id: source.id,
                name: source.name.clone(),
                outcome,
            })
            .ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
