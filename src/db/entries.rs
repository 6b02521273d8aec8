//! Entry inserts and lookups.

use crate::error::{DatabaseError, is_sqlx_unique_violation};
use crate::types::{Entry, SourceId};
use crate::{Error, Result};

use super::{Database, EntryRow, NewEntry, to_millis};

impl Database {
    /// Insert a new entry
    ///
    /// Fails with [`DatabaseError::UniqueViolation`] when the source already
    /// has an entry with the same URL. Each insert is a single statement, so
    /// a failure never affects entries stored before it.
    pub async fn insert_entry(&self, entry: NewEntry) -> Result<Entry> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            INSERT INTO entries (id, source_id, title, description, url,
                                 published_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, source_id, title, description, url,
                      published_at, created_at, updated_at
            "#,
        )
        .bind(entry.id)
        .bind(entry.source_id)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(&entry.url)
        .bind(entry.published_at.map(to_millis))
        .bind(to_millis(entry.created_at))
        .bind(to_millis(entry.updated_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_sqlx_unique_violation(&e) {
                Error::Database(DatabaseError::UniqueViolation(format!(
                    "entry {} already stored for source {}",
                    entry.url, entry.source_id
                )))
            } else {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert entry: {}",
                    e
                )))
            }
        })?;

        row.try_into()
    }

    /// Get all entries of a source, newest publication first
    ///
    /// Entries without a publication time are listed last.
    pub async fn list_entries_for_source(&self, source_id: SourceId) -> Result<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, source_id, title, description, url,
                   published_at, created_at, updated_at
            FROM entries
            WHERE source_id = ?
            ORDER BY published_at DESC NULLS LAST, created_at ASC
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list entries: {}",
                e
            )))
        })?;

        rows.into_iter().map(Entry::try_from).collect()
    }

    /// Count the entries stored for a source
    pub async fn count_entries_for_source(&self, source_id: SourceId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count entries: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
