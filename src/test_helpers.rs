//! Shared test doubles for unit tests.

use crate::db::{Database, NewEntry, NewSource};
use crate::error::{DatabaseError, Error, NetworkError, Result};
use crate::fetch::Fetcher;
use crate::store::FeedStore;
use crate::types::{Entry, Source, SourceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Create a fresh database with migrations applied
///
/// The temp file must be kept alive for as long as the database is used.
pub(crate) async fn setup_db() -> (Arc<Database>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (Arc::new(db), temp_file)
}

/// Register a source with the given name and URL
pub(crate) async fn insert_source(db: &Database, name: &str, url: &str) -> Source {
    db.insert_source(NewSource {
        name: name.to_string(),
        url: url.to_string(),
    })
    .await
    .unwrap()
}

/// Build an RSS 2.0 document from `(title, link, pubDate)` triples
pub(crate) fn rss_document(items: &[(&str, &str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link, pub_date)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <description>About {title}</description>\
                 <pubDate>{pub_date}</pubDate></item>"
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Test Feed</title><link>https://example.com</link><description>Test</description>
{items}
</channel></rss>"#
    )
}

/// [`FeedStore`] wrapper that injects failures and delays
pub(crate) struct FaultyStore {
    inner: Arc<Database>,
    failing_selections: AtomicUsize,
    fail_marks: AtomicBool,
    fail_inserts: AtomicBool,
    insert_delay: Mutex<Option<Duration>>,
    selections: AtomicUsize,
}

impl FaultyStore {
    pub(crate) fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            failing_selections: AtomicUsize::new(0),
            fail_marks: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            insert_delay: Mutex::new(None),
            selections: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` selection queries fail
    pub(crate) fn fail_next_selections(&self, count: usize) {
        self.failing_selections.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_inserts(&self, delay: Duration) {
        *self.insert_delay.lock().unwrap() = Some(delay);
    }

    /// Number of selection queries attempted so far
    pub(crate) fn selections(&self) -> usize {
        self.selections.load(Ordering::SeqCst)
    }
}

fn injected(what: &str) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("injected {what} failure")))
}

#[async_trait]
impl FeedStore for FaultyStore {
    async fn list_sources_due_for_fetch(&self, limit: usize) -> Result<Vec<Source>> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_selections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(injected("selection"));
        }
        self.inner.list_sources_due_for_fetch(limit).await
    }

    async fn mark_source_fetched(&self, id: SourceId, at: DateTime<Utc>) -> Result<Source> {
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(injected("mark"));
        }
        self.inner.mark_source_fetched(id, at).await
    }

    async fn insert_entry(&self, entry: NewEntry) -> Result<Entry> {
        let delay = *self.insert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected("insert"));
        }
        self.inner.insert_entry(entry).await
    }
}

/// Scripted response for [`ScriptedFetcher`]
#[derive(Clone, Debug)]
pub(crate) enum Scripted {
    /// Serve this document
    Document(String),
    /// Fail with an HTTP status
    Status(u16),
    /// Fail as if the connection was refused
    Unreachable,
}

/// In-memory [`Fetcher`] that records calls and tracks parallelism
pub(crate) struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Scripted>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every fetch open for `delay`
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn respond(&self, url: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// URLs fetched so far, in call order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of fetches observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(url).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Some(Scripted::Document(body)) => Ok(body.into_bytes()),
            Some(Scripted::Status(status)) => Err(NetworkError::HttpStatus {
                url: url.to_string(),
                status,
            }
            .into()),
            Some(Scripted::Unreachable) | None => Err(NetworkError::Transport {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }
            .into()),
        }
    }
}
