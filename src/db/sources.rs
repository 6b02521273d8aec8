//! Source registration, due-source selection and fetch marking.

use crate::error::{DatabaseError, is_sqlx_unique_violation};
use crate::types::{Source, SourceId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{Database, NewSource, SourceRow, to_millis};

impl Database {
    /// Register a new feed source
    ///
    /// The URL must be an absolute `http` or `https` URL and must not already
    /// be registered.
    pub async fn insert_source(&self, source: NewSource) -> Result<Source> {
        let parsed = url::Url::parse(&source.url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", source.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                source.url,
                parsed.scheme()
            )));
        }

        let id = SourceId::new();
        let now = to_millis(Utc::now());

        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            INSERT INTO sources (id, name, url, created_at, updated_at, last_fetched_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            RETURNING id, name, url, created_at, updated_at, last_fetched_at
            "#,
        )
        .bind(id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_sqlx_unique_violation(&e) {
                Error::Database(DatabaseError::UniqueViolation(format!(
                    "source URL already registered: {}",
                    source.url
                )))
            } else {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert source: {}",
                    e
                )))
            }
        })?;

        row.try_into()
    }

    /// Get a source by ID
    pub async fn get_source(&self, id: SourceId) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, created_at, updated_at, last_fetched_at
            FROM sources
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get source: {}",
                e
            )))
        })?;

        row.map(Source::try_from).transpose()
    }

    /// Get all sources in registration order
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, created_at, updated_at, last_fetched_at
            FROM sources
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list sources: {}",
                e
            )))
        })?;

        rows.into_iter().map(Source::try_from).collect()
    }

    /// Select up to `limit` sources, least recently attempted first
    ///
    /// Sources that were never attempted sort ahead of every attempted one.
    /// Ties are broken by registration time so selection is deterministic.
    pub async fn list_sources_due_for_fetch(&self, limit: usize) -> Result<Vec<Source>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, name, url, created_at, updated_at, last_fetched_at
            FROM sources
            ORDER BY last_fetched_at ASC NULLS FIRST, created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get next sources to fetch: {}",
                e
            )))
        })?;

        rows.into_iter().map(Source::try_from).collect()
    }

    /// Record a poll attempt on a source and return the updated row
    pub async fn mark_source_fetched(&self, id: SourceId, at: DateTime<Utc>) -> Result<Source> {
        let at = to_millis(at);

        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            UPDATE sources
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING id, name, url, created_at, updated_at, last_fetched_at
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark source fetched: {}",
                e
            )))
        })?;

        row.map(Source::try_from)
            .transpose()?
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(format!("source {}", id))))
    }
}
