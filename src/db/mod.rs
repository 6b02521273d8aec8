//! Database layer for feed-aggregator
//!
//! Handles SQLite persistence for feed sources and their entries.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`sources`]: Source registration, due-source selection, fetch marking
//! - [`entries`]: Entry inserts and lookups
//!
//! Timestamps are stored as Unix milliseconds so that attempts made within the
//! same second still order correctly.

use crate::error::{DatabaseError, Error, Result};
use crate::types::{Entry, EntryId, Source, SourceId};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod entries;
mod migrations;
mod sources;

/// New source to be registered
#[derive(Debug, Clone)]
pub struct NewSource {
    /// Display name
    pub name: String,
    /// Feed URL (must be an absolute http(s) URL)
    pub url: String,
}

/// New entry to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Freshly generated entry ID
    pub id: EntryId,
    /// Owning source
    pub source_id: SourceId,
    /// Item title
    pub title: String,
    /// Item description
    pub description: Option<String>,
    /// Item URL
    pub url: String,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Row update time
    pub updated_at: DateTime<Utc>,
}

/// Source record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct SourceRow {
    /// Source ID
    pub id: SourceId,
    /// Display name
    pub name: String,
    /// Feed URL
    pub url: String,
    /// Unix millis when the source was registered
    pub created_at: i64,
    /// Unix millis when the row was last modified
    pub updated_at: i64,
    /// Unix millis of the last poll attempt
    pub last_fetched_at: Option<i64>,
}

impl TryFrom<SourceRow> for Source {
    type Error = Error;

    fn try_from(row: SourceRow) -> Result<Self> {
        Ok(Source {
            id: row.id,
            name: row.name,
            url: row.url,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            last_fetched_at: row.last_fetched_at.map(from_millis).transpose()?,
        })
    }
}

/// Entry record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct EntryRow {
    /// Entry ID
    pub id: EntryId,
    /// Owning source
    pub source_id: SourceId,
    /// Item title
    pub title: String,
    /// Item description
    pub description: Option<String>,
    /// Item URL
    pub url: String,
    /// Unix millis of publication
    pub published_at: Option<i64>,
    /// Unix millis of row creation
    pub created_at: i64,
    /// Unix millis of row update
    pub updated_at: i64,
}

impl TryFrom<EntryRow> for Entry {
    type Error = Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Entry {
            id: row.id,
            source_id: row.source_id,
            title: row.title,
            description: row.description,
            url: row.url,
            published_at: row.published_at.map(from_millis).transpose()?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Decode a stored timestamp; values outside chrono's range are rejected
pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "stored timestamp {} is out of range",
            millis
        )))
    })
}

/// Database handle for feed-aggregator
pub struct Database {
    pool: SqlitePool,
}
