// src/feed/usgs.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;

use crate::feed::types::{FeedProvider, FetchError, SeismicEvent};

pub const ALL_HOUR_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/all_hour.geojson";
pub const M45_HOUR_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/4.5_hour.geojson";
pub const M25_HOUR_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/2.5_hour.geojson";
pub const M45_DAY_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/4.5_day.geojson";

const AGENT: &str = "QuakeAlertBot/1.0";

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    properties: Properties,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Properties {
    mag: Option<f64>,
    place: Option<String>,
    time: Option<i64>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

impl Feature {
    /// `None` when a required field is missing; the caller skips such features.
    fn into_event(self) -> Option<SeismicEvent> {
        let magnitude = self.properties.mag?;
        let occurred_at = DateTime::<Utc>::from_timestamp_millis(self.properties.time?)?;
        let (longitude, latitude) = match self.geometry.coordinates.as_slice() {
            [lng, lat, ..] => (*lng, *lat),
            _ => return None,
        };
        let depth_km = self.geometry.coordinates.get(2).copied().unwrap_or(0.0);
        Some(SeismicEvent {
            id: self.id,
            magnitude,
            place: self.properties.place.unwrap_or_default(),
            occurred_at,
            longitude,
            latitude,
            depth_km,
            details_url: self.properties.url.unwrap_or_default(),
        })
    }
}

/// Parse a USGS GeoJSON summary document. Malformed features are skipped,
/// a malformed document is an error.
pub fn parse_feature_collection(body: &str) -> Result<Vec<SeismicEvent>, FetchError> {
    let doc: FeatureCollection = serde_json::from_str(body)?;
    let total = doc.features.len();
    let mut out = Vec::with_capacity(total);
    for raw in doc.features {
        match serde_json::from_value::<Feature>(raw).ok().and_then(Feature::into_event) {
            Some(ev) => out.push(ev),
            None => tracing::debug!(target: "feed", "skipping malformed feature"),
        }
    }
    if out.len() < total {
        counter!("feed_malformed_total").increment((total - out.len()) as u64);
    }
    Ok(out)
}

pub struct UsgsFeed {
    name: String,
    mode: Mode,
}

enum Mode {
    // Owned copy so tests can hand in any &str.
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl UsgsFeed {
    pub fn from_url(url: impl Into<String>, client: reqwest::Client) -> Self {
        let url = url.into();
        Self {
            name: feed_name(&url),
            mode: Mode::Http { url, client },
        }
    }

    pub fn from_fixture(name: impl Into<String>, body: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(body.to_string()),
        }
    }

    fn parse_timed(&self, body: &str) -> Result<Vec<SeismicEvent>, FetchError> {
        let t0 = std::time::Instant::now();
        let out = parse_feature_collection(body)?;
        histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("feed_events_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl FeedProvider for UsgsFeed {
    async fn fetch_latest(&self) -> Result<Vec<SeismicEvent>, FetchError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_timed(s),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .header(ACCEPT, "application/json")
                    .header(USER_AGENT, AGENT)
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::Status(status.as_u16()));
                }
                let body = resp.text().await?;
                self.parse_timed(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// "…/summary/4.5_hour.geojson" -> "usgs:4.5_hour"
fn feed_name(url: &str) -> String {
    let stem = url
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".geojson");
    format!("usgs:{stem}")
}
