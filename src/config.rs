//! Configuration types for feed-aggregator

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the SQLite database path
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
/// Environment variable holding the polling interval in seconds
pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL_SECS";
/// Environment variable holding the concurrency limit
pub const ENV_CONCURRENCY: &str = "POLL_CONCURRENCY";
/// Environment variable holding the per-request fetch timeout in seconds
pub const ENV_FETCH_TIMEOUT: &str = "FETCH_TIMEOUT_SECS";
/// Environment variable holding the store call timeout in seconds
pub const ENV_STORE_TIMEOUT: &str = "STORE_TIMEOUT_SECS";
/// Environment variable holding the HTTP user agent
pub const ENV_USER_AGENT: &str = "USER_AGENT";

/// Main configuration for [`FeedAggregator`](crate::FeedAggregator)
///
/// Every field has a default, so an empty JSON object or an empty
/// environment yields a working configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Database path (default: "./feeds.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Time between polling cycles (default: 60 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum number of sources selected, and fetched in parallel, per cycle (default: 10)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout for feed retrieval (default: 10 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Upper bound on any single store call made while polling (default: 30 seconds)
    #[serde(default = "default_store_timeout", with = "duration_serde")]
    pub store_timeout: Duration,

    /// User-Agent header sent with feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            poll_interval: default_poll_interval(),
            concurrency: default_concurrency(),
            fetch_timeout: default_fetch_timeout(),
            store_timeout: default_store_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Build a configuration from process environment variables
    ///
    /// Unset variables keep their defaults. See the `ENV_*` constants for
    /// the recognised keys.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the key when a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// [`Config::from_env`] is this function backed by `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_POLL_INTERVAL)? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, ENV_CONCURRENCY)? {
            config.concurrency = limit;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_FETCH_TIMEOUT)? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_STORE_TIMEOUT)? {
            config.store_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = lookup(ENV_USER_AGENT) {
            config.user_agent = agent;
        }

        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config(
                "concurrency limit must be at least 1",
                "concurrency",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config(
                "poll interval must be greater than zero",
                "poll_interval",
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(Error::config(
                "fetch timeout must be greater than zero",
                "fetch_timeout",
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::config(
                "store timeout must be greater than zero",
                "store_timeout",
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid value {:?}: {}", raw, e), key)),
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./feeds.db")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_concurrency() -> usize {
    10
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("feed-aggregator/", env!("CARGO_PKG_VERSION")).to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
