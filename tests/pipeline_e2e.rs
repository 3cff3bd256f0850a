// tests/pipeline_e2e.rs
//
// Full ticks over fixture feeds, an in-memory registry and a recording
// notifier. No network.

use async_trait::async_trait;
use chrono::Utc;
use quake_alert::dedup::DedupStore;
use quake_alert::feed::types::{FeedProvider, FetchError, SeismicEvent};
use quake_alert::feed::usgs::UsgsFeed;
use quake_alert::geo::Classifier;
use quake_alert::notify::{MemoryNotifier, Notifier};
use quake_alert::pipeline::{Pipeline, TickPhase};
use quake_alert::registry::memory::MemoryStore;
use quake_alert::registry::{Destination, FocusRegion, ReconnectPolicy, Registry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn feature(id: &str, mag: f64, lat: f64, lng: f64, place: &str) -> serde_json::Value {
    json!({
        "type": "Feature",
        "id": id,
        "properties": {
            "mag": mag,
            "place": place,
            "time": 1_743_142_854_000i64,
            "url": format!("https://earthquake.usgs.gov/earthquakes/eventpage/{id}")
        },
        "geometry": { "type": "Point", "coordinates": [lng, lat, 10.0] }
    })
}

fn feed(features: Vec<serde_json::Value>) -> Arc<dyn FeedProvider> {
    let body = json!({ "type": "FeatureCollection", "features": features }).to_string();
    Arc::new(UsgsFeed::from_fixture("usgs:test", &body))
}

/// The scenario feed: "a" inside the primary box, "b" off New England.
fn scenario_feed() -> Arc<dyn FeedProvider> {
    feed(vec![
        feature("a", 6.5, 13.0, 101.0, "Central Thailand"),
        feature("b", 3.0, 40.0, -70.0, "off the coast of Massachusetts"),
    ])
}

fn dest(id: &str, focus: FocusRegion, min: Option<f64>) -> Destination {
    Destination {
        community_id: id.into(),
        channel_id: format!("chan-{id}"),
        channel_name: "earthquake-alerts".into(),
        community_name: format!("Guild {id}"),
        focus_region: focus,
        min_magnitude: min,
        updated_at: Utc::now(),
    }
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<MemoryStore>,
    sink: Arc<MemoryNotifier>,
    dedup: Arc<DedupStore>,
}

fn harness(providers: Vec<Arc<dyn FeedProvider>>, dests: Vec<Destination>) -> Harness {
    let store = Arc::new(MemoryStore::with_records(dests));
    let registry = Arc::new(Registry::new(store.clone(), ReconnectPolicy::default()));
    let sink = Arc::new(MemoryNotifier::new());
    let dedup = Arc::new(DedupStore::default());
    let pipeline = Pipeline::new(
        providers,
        dedup.clone(),
        registry,
        Arc::new(Classifier::default()),
        sink.clone(),
    )
    .with_fetch_timeout(Duration::from_millis(500));
    Harness {
        pipeline,
        store,
        sink,
        dedup,
    }
}

#[tokio::test]
async fn primary_focus_gets_a_and_not_b() {
    let h = harness(
        vec![scenario_feed()],
        vec![dest("g1", FocusRegion::Primary, Some(3.0))],
    );
    let report = h.pipeline.run_tick().await;

    assert_eq!(report.endpoints_ok, 1);
    assert_eq!(report.new_events, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    let sent = h.sink.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (channel, msg) = &sent[0];
    assert_eq!(channel, "chan-g1");
    assert!(msg.embeds[0].title.contains("Magnitude 6.5"));
    assert!(msg.embeds[0].description.contains("eventpage/a"));
    assert_eq!(h.pipeline.phase(), TickPhase::Idle);
}

#[tokio::test]
async fn second_identical_tick_sends_nothing() {
    let h = harness(
        vec![scenario_feed()],
        vec![dest("g1", FocusRegion::Global, Some(1.0))],
    );
    let first = h.pipeline.run_tick().await;
    assert_eq!(first.delivered, 2);

    let second = h.pipeline.run_tick().await;
    assert_eq!(second.fetched, 2);
    assert_eq!(second.new_events, 0);
    assert_eq!(second.delivered, 0);
    assert_eq!(h.sink.count(), 2);
}

#[tokio::test]
async fn registry_outage_completes_with_zero_deliveries() {
    let h = harness(
        vec![scenario_feed()],
        vec![dest("g1", FocusRegion::Global, None)],
    );
    h.store.set_available(false);

    let report = h.pipeline.run_tick().await;
    assert_eq!(report.new_events, 2);
    assert_eq!(report.destinations, 0);
    assert_eq!(report.delivered, 0);
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn failing_destination_does_not_affect_others() {
    let h = harness(
        vec![scenario_feed()],
        vec![
            dest("g1", FocusRegion::Global, None),
            dest("g2", FocusRegion::Global, None),
            dest("g3", FocusRegion::Extended, None),
        ],
    );
    h.sink.fail_channel("chan-g2");

    let report = h.pipeline.run_tick().await;
    // Only "a" (6.5) clears the default thresholds; all three accept it.
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.sink.sent_channels(), vec!["chan-g1", "chan-g3"]);
}

#[tokio::test]
async fn focus_thresholds_apply_after_region() {
    let h = harness(
        vec![feed(vec![
            feature("near-small", 3.2, 14.0, 100.0, "Thailand"),
            feature("tokyo", 4.7, 35.6, 139.7, "near Tokyo, Japan"),
            feature("chile", 6.0, -33.0, -71.0, "offshore Valparaiso, Chile"),
        ])],
        vec![
            dest("primary", FocusRegion::Primary, None),
            dest("extended", FocusRegion::Extended, None),
            dest("continental", FocusRegion::Continental, None),
            dest("global", FocusRegion::Global, None),
        ],
    );
    let report = h.pipeline.run_tick().await;
    assert_eq!(report.new_events, 3);

    let sent = h.sink.sent.lock().unwrap();
    let count_for = |chan: &str| sent.iter().filter(|(c, _)| c == chan).count();
    // primary: only near-small (3.2 >= 3.0)
    assert_eq!(count_for("chan-primary"), 1);
    // extended: near-small is tagged primary but 3.2 < 4.0
    assert_eq!(count_for("chan-extended"), 0);
    // continental: tokyo (4.7 >= 4.5); near-small below 4.5
    assert_eq!(count_for("chan-continental"), 1);
    // global: tokyo and chile (>= 4.0)
    assert_eq!(count_for("chan-global"), 2);
}

struct Down;

#[async_trait]
impl FeedProvider for Down {
    async fn fetch_latest(&self) -> Result<Vec<SeismicEvent>, FetchError> {
        Err(FetchError::Status(500))
    }
    fn name(&self) -> &str {
        "down"
    }
}

#[tokio::test]
async fn total_fetch_failure_leaves_dedup_untouched() {
    let h = harness(
        vec![Arc::new(Down), Arc::new(Down)],
        vec![dest("g1", FocusRegion::Global, None)],
    );
    let report = h.pipeline.run_tick().await;
    assert!(report.all_fetches_failed());
    assert_eq!(report.new_events, 0);
    assert_eq!(h.dedup.size(), 0);
    assert_eq!(h.sink.count(), 0);
    assert_eq!(h.pipeline.phase(), TickPhase::Idle);
}

#[tokio::test]
async fn partial_fetch_failure_still_delivers() {
    let h = harness(
        vec![Arc::new(Down), scenario_feed()],
        vec![dest("g1", FocusRegion::Primary, None)],
    );
    let report = h.pipeline.run_tick().await;
    assert_eq!(report.endpoints_ok, 1);
    assert_eq!(report.endpoints_failed, 1);
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn duplicates_across_endpoints_are_sent_once() {
    let h = harness(
        vec![scenario_feed(), scenario_feed()],
        vec![dest("g1", FocusRegion::Primary, None)],
    );
    let report = h.pipeline.run_tick().await;
    assert_eq!(report.fetched, 4);
    assert_eq!(report.new_events, 2);
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn webhook_receives_globally_filtered_events() {
    let h = harness(vec![scenario_feed()], Vec::new());
    let hook = Arc::new(MemoryNotifier::new());
    let hook_dyn: Arc<dyn Notifier> = hook.clone();
    let pipeline = h.pipeline.with_webhook(hook_dyn);

    let report = pipeline.run_tick().await;
    assert_eq!(report.destinations, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(hook.count(), 1);
    assert_eq!(h.sink.count(), 0);
}
