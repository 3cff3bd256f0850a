//! # Notification pipeline
//!
//! One tick: fetch every feed endpoint, drop events seen before, classify the
//! rest, and fan each one out to every destination whose focus region and
//! magnitude threshold accept it.
//!
//! Filtering order per destination is fixed: focus region first, then the
//! minimum magnitude for that focus (destination override, else config).
//!
//! Nothing here is fatal. A failed fetch ends the tick without touching the
//! dedup set; a failed delivery is logged and never retried at this level.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

use crate::dedup::DedupStore;
use crate::feed::fetch_all;
use crate::feed::types::{FeedProvider, SeismicEvent};
use crate::geo::{Classification, Classifier, RegionRules, RegionTag};
use crate::notify::render::{render_alert, Notification, RenderSettings};
use crate::notify::{AlertMessage, Notifier};
use crate::registry::{Destination, FocusRegion, Registry};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const WEBHOOK_ID: &str = "webhook";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_ticks_total", "Pipeline ticks run.");
        describe_counter!("pipeline_fetch_failed_total", "Ticks where every endpoint failed.");
        describe_counter!("pipeline_new_events_total", "Events that passed dedup.");
        describe_counter!("pipeline_deliveries_total", "Successful deliveries.");
        describe_counter!("pipeline_delivery_errors_total", "Failed deliveries.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last ran.");
        describe_gauge!("pipeline_dedup_size", "Ids currently held by the dedup set.");
        describe_gauge!("registry_pending_ops", "Destination writes waiting for replay.");
    });
}

fn default_global() -> f64 {
    4.0
}
fn default_primary() -> f64 {
    3.0
}
fn default_extended() -> f64 {
    4.0
}
fn default_continental() -> f64 {
    4.5
}

/// Minimum magnitude per focus region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeThresholds {
    #[serde(default = "default_global")]
    pub global: f64,
    #[serde(default = "default_primary")]
    pub primary: f64,
    #[serde(default = "default_extended")]
    pub extended: f64,
    #[serde(default = "default_continental")]
    pub continental: f64,
}

impl Default for MagnitudeThresholds {
    fn default() -> Self {
        Self {
            global: default_global(),
            primary: default_primary(),
            extended: default_extended(),
            continental: default_continental(),
        }
    }
}

impl MagnitudeThresholds {
    pub fn for_focus(&self, focus: FocusRegion) -> f64 {
        match focus {
            FocusRegion::Global => self.global,
            FocusRegion::Primary => self.primary,
            FocusRegion::Extended => self.extended,
            FocusRegion::Continental => self.continental,
        }
    }
}

/// Region half of the per-destination filter.
pub fn focus_accepts(focus: FocusRegion, c: &Classification, rules: &RegionRules) -> bool {
    match focus {
        FocusRegion::Global => true,
        FocusRegion::Primary => c.tag == RegionTag::Primary || c.distance_km <= rules.primary_radius_km,
        FocusRegion::Extended => c.tag != RegionTag::None,
        FocusRegion::Continental => c.in_continental || c.tag != RegionTag::None,
    }
}

/// Full per-destination filter: region first, then magnitude.
pub fn destination_accepts(
    dest: &Destination,
    ev: &SeismicEvent,
    c: &Classification,
    rules: &RegionRules,
    thresholds: &MagnitudeThresholds,
) -> bool {
    if !focus_accepts(dest.focus_region, c, rules) {
        return false;
    }
    let min = dest
        .min_magnitude
        .unwrap_or_else(|| thresholds.for_focus(dest.focus_region));
    ev.magnitude >= min
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickPhase {
    Idle,
    Fetching,
    Filtering,
    Dispatching,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub endpoints_ok: usize,
    pub endpoints_failed: usize,
    pub fetched: usize,
    pub new_events: usize,
    pub destinations: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn all_fetches_failed(&self) -> bool {
        self.endpoints_ok == 0 && self.endpoints_failed > 0
    }
}

/// A delivery target for one tick: a registry destination or the webhook.
struct Target {
    dest: Destination,
    notifier: Arc<dyn Notifier>,
}

pub struct Pipeline {
    providers: Vec<Arc<dyn FeedProvider>>,
    fetch_timeout: Duration,
    dedup: Arc<DedupStore>,
    registry: Arc<Registry>,
    classifier: Arc<Classifier>,
    notifier: Arc<dyn Notifier>,
    webhook: Option<Arc<dyn Notifier>>,
    thresholds: MagnitudeThresholds,
    render: RenderSettings,
    phase: Mutex<TickPhase>,
}

impl Pipeline {
    pub fn new(
        providers: Vec<Arc<dyn FeedProvider>>,
        dedup: Arc<DedupStore>,
        registry: Arc<Registry>,
        classifier: Arc<Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let render = RenderSettings::new(&classifier.regions, &Default::default());
        Self {
            providers,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            dedup,
            registry,
            classifier,
            notifier,
            webhook: None,
            thresholds: MagnitudeThresholds::default(),
            render,
            phase: Mutex::new(TickPhase::Idle),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_thresholds(mut self, thresholds: MagnitudeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_render(mut self, render: RenderSettings) -> Self {
        self.render = render;
        self
    }

    /// Extra sink that receives every event passing the global filter.
    pub fn with_webhook(mut self, webhook: Arc<dyn Notifier>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn phase(&self) -> TickPhase {
        *self.phase.lock().expect("phase mutex poisoned")
    }

    fn set_phase(&self, p: TickPhase) {
        *self.phase.lock().expect("phase mutex poisoned") = p;
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Run one full tick. Always ends back in `Idle`.
    pub async fn run_tick(&self) -> TickReport {
        ensure_metrics_described();
        counter!("pipeline_ticks_total").increment(1);
        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);

        let report = self.tick_inner().await;
        self.set_phase(TickPhase::Idle);
        gauge!("pipeline_dedup_size").set(self.dedup.size() as f64);
        report
    }

    async fn tick_inner(&self) -> TickReport {
        let mut report = TickReport::default();

        // Fetching
        self.set_phase(TickPhase::Fetching);
        let batch = fetch_all(&self.providers, self.fetch_timeout).await;
        report.endpoints_ok = batch.successes.len();
        report.endpoints_failed = batch.failures.len();
        if batch.all_failed() {
            tracing::warn!(
                target: "pipeline",
                endpoints = report.endpoints_failed,
                "all feed endpoints failed, skipping tick"
            );
            counter!("pipeline_fetch_failed_total").increment(1);
            return report;
        }

        // Filtering
        self.set_phase(TickPhase::Filtering);
        let raw = batch.into_events();
        report.fetched = raw.len();
        let fresh = self.dedup.filter_new(dedupe_by_id(raw));
        report.new_events = fresh.len();
        counter!("pipeline_new_events_total").increment(fresh.len() as u64);
        if fresh.is_empty() {
            tracing::debug!(target: "pipeline", fetched = report.fetched, "no new events");
            return report;
        }

        // Classify, most urgent first.
        let mut notes: Vec<Notification> = fresh
            .into_iter()
            .map(|event| {
                let class = self.classifier.classify(&event);
                let impact = self.classifier.impact_assessment(event.magnitude, &class);
                Notification {
                    event,
                    class,
                    impact,
                }
            })
            .collect();
        sort_by_urgency(&mut notes);

        // Dispatching
        self.set_phase(TickPhase::Dispatching);
        let targets = self.targets().await;
        report.destinations = targets.len();
        if targets.is_empty() {
            tracing::info!(target: "pipeline", new = report.new_events, "no destinations configured");
            return report;
        }

        for note in &notes {
            let (ok, failed) = self.dispatch_one(note, &targets).await;
            report.delivered += ok;
            report.failed += failed;
        }

        tracing::info!(
            target: "pipeline",
            new = report.new_events,
            delivered = report.delivered,
            failed = report.failed,
            "tick dispatched"
        );
        report
    }

    async fn targets(&self) -> Vec<Target> {
        let mut dests: Vec<Destination> = self.registry.get_all().await.into_values().collect();
        dests.sort_by(|a, b| a.community_id.cmp(&b.community_id));
        let mut out: Vec<Target> = dests
            .into_iter()
            .map(|dest| Target {
                dest,
                notifier: Arc::clone(&self.notifier),
            })
            .collect();
        if let Some(hook) = &self.webhook {
            out.push(Target {
                dest: Destination {
                    community_id: WEBHOOK_ID.to_string(),
                    channel_id: WEBHOOK_ID.to_string(),
                    channel_name: WEBHOOK_ID.to_string(),
                    community_name: WEBHOOK_ID.to_string(),
                    focus_region: FocusRegion::Global,
                    min_magnitude: None,
                    updated_at: chrono::Utc::now(),
                },
                notifier: Arc::clone(hook),
            });
        }
        out
    }

    /// Deliver one event to every accepting target concurrently.
    /// Returns (delivered, failed).
    async fn dispatch_one(&self, note: &Notification, targets: &[Target]) -> (usize, usize) {
        let rules = &self.classifier.regions;
        let accepted: Vec<&Target> = targets
            .iter()
            .filter(|t| destination_accepts(&t.dest, &note.event, &note.class, rules, &self.thresholds))
            .collect();
        if accepted.is_empty() {
            tracing::debug!(target: "pipeline", id = %note.event.id, "no destination accepts event");
            return (0, 0);
        }

        let msg: Arc<AlertMessage> = Arc::new(render_alert(note, &self.render));
        let mut set = JoinSet::new();
        for t in accepted {
            let notifier = Arc::clone(&t.notifier);
            let msg = Arc::clone(&msg);
            let community = t.dest.community_id.clone();
            let channel = t.dest.channel_id.clone();
            set.spawn(async move {
                let res = notifier.send(&channel, &msg).await;
                (community, channel, notifier.name(), res)
            });
        }

        let (mut ok, mut failed) = (0usize, 0usize);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((community, channel, sink, Ok(()))) => {
                    ok += 1;
                    counter!("pipeline_deliveries_total").increment(1);
                    tracing::info!(
                        target: "pipeline",
                        %community, %channel, sink,
                        id = %note.event.id,
                        magnitude = note.event.magnitude,
                        "sent earthquake notification"
                    );
                }
                Ok((community, channel, sink, Err(e))) => {
                    failed += 1;
                    counter!("pipeline_delivery_errors_total").increment(1);
                    tracing::warn!(
                        target: "pipeline",
                        %community, %channel, sink,
                        id = %note.event.id,
                        error = %e,
                        "delivery failed"
                    );
                }
                Err(e) => {
                    failed += 1;
                    counter!("pipeline_delivery_errors_total").increment(1);
                    tracing::error!(target: "pipeline", error = %e, "delivery task panicked");
                }
            }
        }
        (ok, failed)
    }
}

/// First occurrence wins; cross-endpoint duplicates are expected.
fn dedupe_by_id(events: Vec<SeismicEvent>) -> Vec<SeismicEvent> {
    let mut seen = HashSet::with_capacity(events.len());
    events
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

/// Ascending score; ties by higher magnitude, then id.
fn sort_by_urgency(notes: &mut [Notification]) {
    notes.sort_by(|a, b| {
        a.class
            .score
            .cmp(&b.class.score)
            .then(b.event.magnitude.total_cmp(&a.event.magnitude))
            .then_with(|| a.event.id.cmp(&b.event.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ev(id: &str, lat: f64, lng: f64, mag: f64) -> SeismicEvent {
        SeismicEvent {
            id: id.into(),
            magnitude: mag,
            place: String::new(),
            occurred_at: Utc::now(),
            longitude: lng,
            latitude: lat,
            depth_km: 10.0,
            details_url: String::new(),
        }
    }

    fn note(c: &Classifier, e: SeismicEvent) -> Notification {
        let class = c.classify(&e);
        Notification {
            event: e,
            class,
            impact: String::new(),
        }
    }

    #[test]
    fn within_batch_duplicates_are_dropped() {
        let out = dedupe_by_id(vec![ev("a", 0.0, 0.0, 1.0), ev("a", 1.0, 1.0, 2.0), ev("b", 0.0, 0.0, 1.0)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].latitude, 0.0);
    }

    #[test]
    fn most_urgent_sorts_first() {
        let c = Classifier::default();
        let mut notes = vec![
            note(&c, ev("far-small", 40.0, -70.0, 4.0)),
            note(&c, ev("near-big", 13.0, 101.0, 7.1)),
            note(&c, ev("near-small", 13.0, 101.0, 4.2)),
        ];
        sort_by_urgency(&mut notes);
        let ids: Vec<_> = notes.iter().map(|n| n.event.id.as_str()).collect();
        assert_eq!(ids, vec!["near-big", "near-small", "far-small"]);
    }

    #[test]
    fn primary_focus_accepts_by_radius_too() {
        let c = Classifier::default();
        let rules = &c.regions;
        // Yangon-ish: outside primary bounds but within 1000 km of Bangkok.
        let cl = c.classify(&ev("x", 16.8, 96.2, 5.0));
        assert_ne!(cl.tag, RegionTag::Primary);
        assert!(focus_accepts(FocusRegion::Primary, &cl, rules));

        let far = c.classify(&ev("y", 35.0, 139.0, 5.0));
        assert!(!focus_accepts(FocusRegion::Primary, &far, rules));
        assert!(focus_accepts(FocusRegion::Continental, &far, rules));
        assert!(!focus_accepts(FocusRegion::Extended, &far, rules));
        assert!(focus_accepts(FocusRegion::Global, &far, rules));
    }

    #[test]
    fn destination_override_beats_focus_threshold() {
        let c = Classifier::default();
        let e = ev("z", 13.0, 101.0, 3.5);
        let cl = c.classify(&e);
        let mut d = Destination {
            community_id: "g".into(),
            channel_id: "c".into(),
            channel_name: "n".into(),
            community_name: "G".into(),
            focus_region: FocusRegion::Global,
            min_magnitude: None,
            updated_at: Utc::now(),
        };
        let th = MagnitudeThresholds::default();
        assert!(!destination_accepts(&d, &e, &cl, &c.regions, &th));
        d.min_magnitude = Some(3.0);
        assert!(destination_accepts(&d, &e, &cl, &c.regions, &th));
    }
}
