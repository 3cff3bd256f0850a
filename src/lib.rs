// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod app;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod feed;
pub mod geo;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use crate::api::router;
pub use crate::config::MonitorConfig;
pub use crate::feed::types::SeismicEvent;
pub use crate::pipeline::{Pipeline, TickReport};

/// Load config (file + env) and build the full service router.
pub async fn app() -> anyhow::Result<axum::Router> {
    let cfg = MonitorConfig::load_default()?;
    app::build(cfg).await
}
