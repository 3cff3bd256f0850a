// src/feed/types.rs
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One earthquake as reported by the feed. Immutable once fetched.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SeismicEvent {
    pub id: String, // feed-unique, stable across polls
    pub magnitude: f64,
    pub place: String, // may be empty
    pub occurred_at: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    pub depth_km: f64,
    pub details_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("non-success status {0}")]
    Status(u16),
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed feed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait::async_trait]
pub trait FeedProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<SeismicEvent>, FetchError>;
    fn name(&self) -> &str;
}
