//! Core types for feed-aggregator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the inner UUID
            pub fn get(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <Uuid as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <Uuid as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <Uuid as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a registered feed source
    SourceId
);

uuid_id!(
    /// Unique identifier for a stored entry
    EntryId
);

/// A registered feed endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Source ID
    pub id: SourceId,
    /// Display name used in logs
    pub name: String,
    /// Retrieval URL
    pub url: String,
    /// When the source was registered
    pub created_at: DateTime<Utc>,
    /// When the source row was last modified
    pub updated_at: DateTime<Utc>,
    /// When a poll was last attempted (None = never attempted)
    ///
    /// Records the attempt, not its success.
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// One syndicated item stored for a source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry ID
    pub id: EntryId,
    /// Owning source
    pub source_id: SourceId,
    /// Item title
    pub title: String,
    /// Item description
    pub description: Option<String>,
    /// Item URL; unique per source
    pub url: String,
    /// Publication time, when the document supplied a parseable one
    pub published_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Row update time
    pub updated_at: DateTime<Utc>,
}

/// Stage of a poll attempt at which it failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStage {
    /// Recording the attempt on the source failed
    MarkFetched,
    /// Retrieving the document failed
    Fetch,
    /// Decoding the document failed
    Parse,
    /// The worker task itself aborted
    Worker,
}

impl std::fmt::Display for PollStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollStage::MarkFetched => "mark_fetched",
            PollStage::Fetch => "fetch",
            PollStage::Parse => "parse",
            PollStage::Worker => "worker",
        };
        f.write_str(s)
    }
}

/// Result of one source's poll attempt
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PollOutcome {
    /// The document was retrieved and every entry was offered to the store
    Completed {
        /// Entries present in the document
        entries_found: usize,
        /// Entries newly stored
        inserted: usize,
        /// Entries that were already stored
        duplicates: usize,
        /// Entries that could not be stored
        failed: usize,
    },
    /// The attempt stopped before entries were processed
    Failed {
        /// Where the attempt stopped
        stage: PollStage,
        /// Error description
        reason: String,
    },
}

impl PollOutcome {
    /// Whether the attempt reached entry reconciliation
    pub fn is_completed(&self) -> bool {
        matches!(self, PollOutcome::Completed { .. })
    }
}

/// Aggregate counts for one polling cycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Sources selected for this cycle
    pub sources_selected: usize,
    /// Sources whose poll completed
    pub sources_completed: usize,
    /// Sources whose poll failed
    pub sources_failed: usize,
    /// Entries present across all fetched documents
    pub entries_found: usize,
    /// Entries newly stored
    pub entries_inserted: usize,
    /// Entries already stored
    pub entries_duplicate: usize,
    /// Entries that could not be stored
    pub entries_failed: usize,
    /// Wall-clock duration of the cycle
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl CycleReport {
    /// Fold one source's outcome into the report
    pub fn record(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Completed {
                entries_found,
                inserted,
                duplicates,
                failed,
            } => {
                self.sources_completed += 1;
                self.entries_found += entries_found;
                self.entries_inserted += inserted;
                self.entries_duplicate += duplicates;
                self.entries_failed += failed;
            }
            PollOutcome::Failed { .. } => {
                self.sources_failed += 1;
            }
        }
    }
}

/// Event emitted by the scheduler
///
/// Delivered over a broadcast channel; see
/// [`FeedAggregator::subscribe`](crate::FeedAggregator::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A cycle selected its batch
    CycleStarted {
        /// Cycle number
        cycle: u64,
        /// Number of sources selected
        sources: usize,
    },

    /// A cycle was abandoned because source selection failed
    CycleSkipped {
        /// Cycle number
        cycle: u64,
        /// Error message
        error: String,
    },

    /// One source finished its poll attempt
    SourcePolled {
        /// Cycle number
        cycle: u64,
        /// Source ID
        source_id: SourceId,
        /// Source display name
        name: String,
        /// What happened
        outcome: PollOutcome,
    },

    /// Every worker of a cycle has finished
    CycleCompleted {
        /// Cycle summary
        report: CycleReport,
    },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
