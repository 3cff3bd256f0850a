// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _; // for `oneshot`

use quake_alert::api::{self, AppState};
use quake_alert::commands::{ChannelDirectory, ChannelRef, RecentEvents};
use quake_alert::dedup::DedupStore;
use quake_alert::feed::usgs::UsgsFeed;
use quake_alert::geo::Classifier;
use quake_alert::notify::render::RenderSettings;
use quake_alert::notify::MemoryNotifier;
use quake_alert::pipeline::Pipeline;
use quake_alert::registry::memory::MemoryStore;
use quake_alert::registry::{ReconnectPolicy, Registry};

const BODY_LIMIT: usize = 1024 * 1024;
const FIXTURE: &str = include_str!("fixtures/usgs_hour.geojson");

struct OneChannel;

#[async_trait]
impl ChannelDirectory for OneChannel {
    async fn find_text_channel(&self, _community_id: &str, name: &str) -> Result<Option<ChannelRef>> {
        Ok(Some(ChannelRef {
            id: "555".into(),
            name: name.into(),
        }))
    }

    async fn create_text_channel(&self, _community_id: &str, _name: &str) -> Result<ChannelRef> {
        anyhow::bail!("not expected")
    }
}

fn test_router() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(Registry::new(store.clone(), ReconnectPolicy::default()));
    let classifier = Arc::new(Classifier::default());
    let pipeline = Arc::new(Pipeline::new(
        Vec::new(),
        Arc::new(DedupStore::default()),
        registry.clone(),
        classifier.clone(),
        Arc::new(MemoryNotifier::new()),
    ));
    let recent = Arc::new(RecentEvents {
        feed: Arc::new(UsgsFeed::from_fixture("usgs:4.5_day", FIXTURE)),
        classifier,
        render: RenderSettings::default(),
        timeout: Duration::from_secs(1),
    });
    let state = AppState {
        registry,
        directory: Arc::new(OneChannel),
        recent,
        pipeline,
    };
    (api::router(state), store)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

#[tokio::test]
async fn liveness_routes_return_documented_bodies() {
    let (app, _) = test_router();
    for (uri, want) in [("/health", "OK"), ("/ping", "PONG")] {
        let (status, body) = call(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), want);
    }
    let (status, body) = call(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("running"));
}

#[tokio::test]
async fn put_list_delete_destination() {
    let (app, store) = test_router();

    let (status, body) = call(
        &app,
        "PUT",
        "/destinations/guild-1",
        Some(serde_json::json!({ "channel": "Earthquake Alerts", "region": "thailand", "community_name": "Guild" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["channel"]["id"], "555");
    assert_eq!(v["focus_region"], "primary");
    assert_eq!(v["queued"], false);
    assert!(store.get("guild-1").is_some());

    let (status, body) = call(&app, "GET", "/destinations", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v[0]["communityId"], "guild-1");
    assert_eq!(v[0]["channelName"], "earthquake-alerts");
    assert_eq!(v[0]["focusRegion"], "primary");

    let (status, _) = call(&app, "DELETE", "/destinations/guild-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(store.get("guild-1").is_none());
}

#[tokio::test]
async fn bad_region_is_a_400() {
    let (app, _) = test_router();
    let (status, body) = call(
        &app,
        "PUT",
        "/destinations/g",
        Some(serde_json::json!({ "channel": "alerts", "region": "mars" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert!(v["error"].as_str().unwrap().contains("mars"));

    let (status, _) = call(&app, "GET", "/recent?region=mars", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recent_lists_newest_first_and_clamps_count() {
    let (app, _) = test_router();

    let (status, body) = call(&app, "GET", "/recent?count=9", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    // Fixture has three valid events; count is clamped to 5. The title
    // counts what is shown, not what was asked for.
    let embeds = v["embeds"].as_array().unwrap();
    assert_eq!(embeds.len(), 3);
    assert!(v["content"].as_str().unwrap().contains("Latest 3 Global"));
    assert!(embeds[0]["title"].as_str().unwrap().contains("Magnitude 7.7"));

    let (_, body) = call(&app, "GET", "/recent?count=1&region=primary", None).await;
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["embeds"].as_array().unwrap().len(), 1);
    assert!(v["content"].as_str().unwrap().contains("Thailand"));
}

#[tokio::test]
async fn status_reports_pipeline_and_registry() {
    let (app, _) = test_router();
    let (status, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["phase"], "Idle");
    assert_eq!(v["dedup_size"], 0);
    assert_eq!(v["pending_ops"], 0);
}
