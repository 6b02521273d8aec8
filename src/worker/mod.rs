//! Single-source poll attempt
//!
//! A [`SourceWorker`] drives one source through mark, fetch, parse and
//! reconcile. It never returns an error: every failure is logged where it
//! happens and folded into the returned [`PollOutcome`], so one bad source
//! cannot affect its siblings or the scheduler.

use crate::fetch::Fetcher;
use crate::parser::DocumentParser;
use crate::reconciler::{EntryReconciler, ReconcileOutcome};
use crate::store::{FeedStore, with_store_timeout};
use crate::types::{PollOutcome, PollStage, Source};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Performs poll attempts for individual sources
pub struct SourceWorker {
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn DocumentParser>,
    reconciler: EntryReconciler,
    store_timeout: Duration,
}

impl SourceWorker {
    /// Create a worker from its collaborators
    ///
    /// `store_timeout` bounds every store call the worker makes.
    pub fn new(
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn DocumentParser>,
        store_timeout: Duration,
    ) -> Self {
        let reconciler = EntryReconciler::new(store.clone(), store_timeout);
        Self {
            store,
            fetcher,
            parser,
            reconciler,
            store_timeout,
        }
    }

    /// Run one complete poll attempt for `source`
    ///
    /// The attempt is recorded on the source before anything is fetched, so
    /// an unreachable source still moves to the back of the selection order.
    /// If the attempt cannot be recorded, nothing else is done.
    pub async fn poll(&self, source: &Source) -> PollOutcome {
        let marked = with_store_timeout(
            "mark_source_fetched",
            self.store_timeout,
            self.store.mark_source_fetched(source.id, Utc::now()),
        )
        .await;
        if let Err(e) = marked {
            error!(
                source = %source.name,
                source_id = %source.id,
                error = %e,
                "Failed to mark source {} as fetched",
                source.name
            );
            return PollOutcome::Failed {
                stage: PollStage::MarkFetched,
                reason: e.to_string(),
            };
        }

        let document = match self.fetcher.fetch(&source.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    source = %source.name,
                    url = %source.url,
                    error = %e,
                    "Failed to collect source {}",
                    source.name
                );
                return PollOutcome::Failed {
                    stage: PollStage::Fetch,
                    reason: e.to_string(),
                };
            }
        };

        let feed = match self.parser.parse(&document) {
            Ok(feed) => feed,
            Err(e) => {
                warn!(
                    source = %source.name,
                    url = %source.url,
                    error = %e,
                    "Failed to parse document for source {}",
                    source.name
                );
                return PollOutcome::Failed {
                    stage: PollStage::Parse,
                    reason: e.to_string(),
                };
            }
        };

        let entries_found = feed.items.len();
        let mut inserted = 0;
        let mut duplicates = 0;
        let mut failed = 0;

        // Sequential: one failed insert must not stop its siblings
        for item in &feed.items {
            match self.reconciler.reconcile(source, item).await {
                ReconcileOutcome::Inserted(_) => inserted += 1,
                ReconcileOutcome::AlreadyPresent => duplicates += 1,
                ReconcileOutcome::Failed(_) => failed += 1,
            }
        }

        info!(
            source = %source.name,
            entries_found,
            inserted,
            duplicates,
            failed,
            "Finished scraping {}, {} entries found",
            source.name,
            entries_found
        );

        PollOutcome::Completed {
            entries_found,
            inserted,
            duplicates,
            failed,
        }
    }
}
