//! Snapshot fetching from the external analytics backend.
//!
//! The backend is a plain HTTP/JSON service; its payloads are treated as
//! opaque. Fetching goes through the [`SnapshotFetcher`] trait so the poller
//! can be tested against a mock backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use kakehashi_shared::protocol::Room;

/// Per-request timeout against the backend
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while fetching a snapshot
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, invalid body)
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Backend answered with a non-2xx status
    #[error("backend returned {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Data-source abstraction for the poller
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the current snapshot for one data kind
    async fn fetch(&self, room: Room) -> Result<Value, FetchError>;
}

/// reqwest-backed fetcher against the analytics backend
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotFetcher {
    /// Create a fetcher for the given backend base URL (no trailing slash)
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, room: Room) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), room)
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self, room: Room) -> Result<Value, FetchError> {
        let url = self.endpoint(room);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }

        response
            .json::<Value>()
            .await
            .map_err(|source| FetchError::Request { url, source })
    }
}
