//! Store interface consumed by the polling core
//!
//! The scheduler and workers only need three operations from the durable
//! store. [`FeedStore`] names them so the SQLite [`Database`] can be swapped
//! for another backend, or wrapped to inject faults in tests.

use crate::db::{Database, NewEntry};
use crate::error::{DatabaseError, Error, Result};
use crate::types::{Entry, Source, SourceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Durable store operations used while polling
///
/// Implementations must resolve concurrent inserts of the same
/// (source, URL) pair so that exactly one succeeds and the others fail with
/// an error for which [`Error::is_unique_violation`] returns true.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Up to `limit` sources ordered by last attempt, never-attempted first
    async fn list_sources_due_for_fetch(&self, limit: usize) -> Result<Vec<Source>>;

    /// Record a poll attempt on a source
    async fn mark_source_fetched(&self, id: SourceId, at: DateTime<Utc>) -> Result<Source>;

    /// Store a new entry, or fail with a uniqueness violation if it exists
    async fn insert_entry(&self, entry: NewEntry) -> Result<Entry>;
}

#[async_trait]
impl FeedStore for Database {
    async fn list_sources_due_for_fetch(&self, limit: usize) -> Result<Vec<Source>> {
        Database::list_sources_due_for_fetch(self, limit).await
    }

    async fn mark_source_fetched(&self, id: SourceId, at: DateTime<Utc>) -> Result<Source> {
        Database::mark_source_fetched(self, id, at).await
    }

    async fn insert_entry(&self, entry: NewEntry) -> Result<Entry> {
        Database::insert_entry(self, entry).await
    }
}

/// Bound a store call by `timeout`
///
/// Expiry yields [`DatabaseError::Timeout`] naming `operation`.
pub(crate) async fn with_store_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Database(DatabaseError::Timeout { operation, timeout })),
    }
}
