//! Entry reconciliation
//!
//! Offers each parsed item to the store as a new entry. Because the same
//! document is fetched over and over, most inserts on a steady-state feed are
//! rejected as duplicates; that is the expected path and not an error.

use crate::db::NewEntry;
use crate::parser::ParsedItem;
use crate::store::{FeedStore, with_store_timeout};
use crate::types::{EntryId, Source};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What happened to one parsed item
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new entry was stored
    Inserted(EntryId),
    /// The source already had an entry with this URL
    AlreadyPresent,
    /// The entry could not be stored
    Failed(String),
}

/// Stores parsed items as entries, treating duplicates as success
pub struct EntryReconciler {
    store: Arc<dyn FeedStore>,
    store_timeout: Duration,
}

impl EntryReconciler {
    /// Create a reconciler writing to `store`
    pub fn new(store: Arc<dyn FeedStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Insert `item` as a new entry of `source`
    ///
    /// Never returns an error: failures are logged with the source name and
    /// item title, and reported as [`ReconcileOutcome::Failed`].
    pub async fn reconcile(&self, source: &Source, item: &ParsedItem) -> ReconcileOutcome {
        let Some(url) = item.link.clone() else {
            warn!(
                source = %source.name,
                title = %item.title,
                "Skipping entry without a link"
            );
            return ReconcileOutcome::Failed("entry has no link".to_string());
        };

        let now = Utc::now();
        let entry = NewEntry {
            id: EntryId::new(),
            source_id: source.id,
            title: item.title.clone(),
            description: item.description.clone(),
            url,
            published_at: item.published_at,
            created_at: now,
            updated_at: now,
        };

        let result = with_store_timeout(
            "insert_entry",
            self.store_timeout,
            self.store.insert_entry(entry),
        )
        .await;

        match result {
            Ok(stored) => {
                debug!(source = %source.name, url = %stored.url, "Stored new entry");
                ReconcileOutcome::Inserted(stored.id)
            }
            Err(e) if e.is_unique_violation() => {
                debug!(source = %source.name, title = %item.title, "Entry already stored");
                ReconcileOutcome::AlreadyPresent
            }
            Err(e) => {
                warn!(
                    source = %source.name,
                    title = %item.title,
                    error = %e,
                    "Failed to create entry for source {}",
                    source.name
                );
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }
}
