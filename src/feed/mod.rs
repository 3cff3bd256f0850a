// src/feed/mod.rs
pub mod types;
pub mod usgs;

use crate::feed::types::{FeedProvider, FetchError, SeismicEvent};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_events_total", "Total events parsed from feeds.");
        describe_counter!("feed_malformed_total", "Features skipped as malformed.");
        describe_counter!("feed_errors_total", "Feed fetch failures (timeout/status/transport).");
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("feed_fetch_ms", "Feed fetch time in milliseconds.");
    });
}

/// Result of a single endpoint fetch. Failures are values, never raised.
#[derive(Debug)]
pub enum FetchOutcome {
    Events(Vec<SeismicEvent>),
    Failed(FetchError),
}

/// Fetch one endpoint under a hard timeout. The provider future is dropped
/// (cancelled) when the timeout fires.
pub async fn fetch_endpoint(provider: &dyn FeedProvider, timeout: Duration) -> FetchOutcome {
    ensure_metrics_described();
    let t0 = std::time::Instant::now();
    let res = match tokio::time::timeout(timeout, provider.fetch_latest()).await {
        Ok(r) => r,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };
    histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    match res {
        Ok(events) => FetchOutcome::Events(events),
        Err(e) => {
            tracing::warn!(target: "feed", error = %e, provider = provider.name(), "feed fetch failed");
            counter!("feed_errors_total").increment(1);
            FetchOutcome::Failed(e)
        }
    }
}

/// Partial results of one round over all endpoints.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub successes: Vec<(String, Vec<SeismicEvent>)>,
    pub failures: Vec<(String, FetchError)>,
}

impl FetchBatch {
    pub fn all_failed(&self) -> bool {
        self.successes.is_empty()
    }

    /// Flatten successes in endpoint order. Cross-endpoint duplicates are kept.
    pub fn into_events(self) -> Vec<SeismicEvent> {
        self.successes.into_iter().flat_map(|(_, v)| v).collect()
    }
}

/// Fetch every endpoint concurrently. One slow or broken endpoint never
/// blocks the others; its failure is reported next to the successes.
pub async fn fetch_all(providers: &[Arc<dyn FeedProvider>], timeout: Duration) -> FetchBatch {
    let mut set = JoinSet::new();
    for (idx, p) in providers.iter().enumerate() {
        let p = Arc::clone(p);
        set.spawn(async move {
            let outcome = fetch_endpoint(p.as_ref(), timeout).await;
            (idx, p.name().to_string(), outcome)
        });
    }

    let mut done = Vec::with_capacity(providers.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(r) => done.push(r),
            Err(e) => tracing::error!(target: "feed", error = %e, "fetch task panicked"),
        }
    }
    // Keep configured endpoint order so merges are deterministic.
    done.sort_by_key(|(idx, _, _)| *idx);

    let mut batch = FetchBatch::default();
    for (_, name, outcome) in done {
        match outcome {
            FetchOutcome::Events(v) => batch.successes.push((name, v)),
            FetchOutcome::Failed(e) => batch.failures.push((name, e)),
        }
    }
    batch
}
