//! Feed retrieval over HTTP
//!
//! One bounded-time GET per call. No retries: a failed source is simply
//! picked up again by a later polling cycle.

use crate::error::{Error, NetworkError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Retrieves raw feed documents
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the document at `url`, returning the response body
    ///
    /// # Errors
    /// Returns [`Error::Network`] on timeout, transport failure, or a
    /// non-success HTTP status.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`Fetcher`] backed by a shared `reqwest` client
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher whose requests are bounded by `timeout`
    ///
    /// The timeout covers connecting, sending, and reading the whole body.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// The per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> NetworkError {
        if e.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            NetworkError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "Fetching feed");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        // Check HTTP status before trying to read the response body
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(|e| self.classify(url, e))?;

        debug!(url = %url, bytes = body.len(), "Fetched feed");
        Ok(body.to_vec())
    }
}
