//! # Geo classification
//!
//! Pure, stateless rules that turn a [`SeismicEvent`] into a region tag,
//! a distance from the focal anchor, a priority score and an alert level.
//!
//! - Region tags are evaluated from an ordered table, first match wins:
//!   `Primary` > `Neighbor` > `Extended` > `None`.
//! - Priority starts at 100 and only goes down; lower means more urgent.
//! - Every threshold lives in [`RegionRules`] / [`ScoringRules`] so it can be
//!   tuned from the config file without a rebuild.

use serde::{Deserialize, Serialize};

use crate::feed::types::SeismicEvent;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Inclusive lat/lng rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl RegionBounds {
    pub fn new(name: &str, min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self {
            name: name.to_string(),
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborCountry {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl NeighborCountry {
    fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Great-circle distance (haversine).
pub fn distance_km(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> f64 {
    let d_lat = (lat_b - lat_a).to_radians();
    let d_lng = (lng_b - lng_a).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat_a.to_radians().cos() * lat_b.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn in_bounds(point: GeoPoint, bounds: &RegionBounds) -> bool {
    point.lat >= bounds.min_lat
        && point.lat <= bounds.max_lat
        && point.lng >= bounds.min_lng
        && point.lng <= bounds.max_lng
}

/// Case-insensitive substring match of any country name or keyword.
pub fn matches_keyword(place: &str, neighbors: &[NeighborCountry]) -> bool {
    if place.trim().is_empty() {
        return false;
    }
    let place = place.to_lowercase();
    neighbors.iter().any(|c| {
        std::iter::once(&c.name)
            .chain(c.keywords.iter())
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && place.contains(&k))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionTag {
    Primary,
    Neighbor,
    Extended,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Extreme,
    High,
    Moderate,
    Low,
    Info,
}

impl AlertLevel {
    pub fn label(self) -> &'static str {
        match self {
            AlertLevel::Extreme => "EXTREME ALERT",
            AlertLevel::High => "HIGH ALERT",
            AlertLevel::Moderate => "MODERATE ALERT",
            AlertLevel::Low => "LOW ALERT",
            AlertLevel::Info => "INFORMATION ONLY",
        }
    }
}

/* ----------------------------
Config schema
---------------------------- */

fn default_anchor() -> GeoPoint {
    GeoPoint::new(13.7563, 100.5018)
}
fn default_anchor_label() -> String {
    "Bangkok".to_string()
}
fn default_home_label() -> String {
    "Thailand".to_string()
}
fn default_primary() -> RegionBounds {
    RegionBounds::new("Thailand Area", 5.0, 22.0, 97.0, 106.0)
}
fn default_extended() -> RegionBounds {
    RegionBounds::new("Southeast Asia", -11.0, 28.0, 92.0, 141.0)
}
fn default_continental() -> RegionBounds {
    RegionBounds::new("Asia", -11.0, 55.0, 60.0, 150.0)
}
fn default_primary_radius_km() -> f64 {
    1000.0
}
fn default_neighbors() -> Vec<NeighborCountry> {
    vec![
        NeighborCountry::new("Myanmar", &["myanmar", "burma"]),
        NeighborCountry::new("Laos", &["laos", "lao"]),
        NeighborCountry::new("Cambodia", &["cambodia"]),
        NeighborCountry::new("Vietnam", &["vietnam"]),
        NeighborCountry::new("Malaysia", &["malaysia"]),
        NeighborCountry::new("Indonesia", &["indonesia", "sumatra"]),
        NeighborCountry::new("Philippines", &["philippines"]),
    ]
}

/// Static geography around the focal anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRules {
    #[serde(default = "default_anchor")]
    pub anchor: GeoPoint,
    /// City name shown as "Distance from …".
    #[serde(default = "default_anchor_label")]
    pub anchor_label: String,
    /// Country name used in banners and impact texts.
    #[serde(default = "default_home_label")]
    pub home_label: String,
    #[serde(default = "default_primary")]
    pub primary: RegionBounds,
    #[serde(default = "default_extended")]
    pub extended: RegionBounds,
    #[serde(default = "default_continental")]
    pub continental: RegionBounds,
    #[serde(default = "default_neighbors")]
    pub neighbors: Vec<NeighborCountry>,
    /// Alternate primary-focus membership: within this radius of the anchor.
    #[serde(default = "default_primary_radius_km")]
    pub primary_radius_km: f64,
}

impl Default for RegionRules {
    fn default() -> Self {
        Self {
            anchor: default_anchor(),
            anchor_label: default_anchor_label(),
            home_label: default_home_label(),
            primary: default_primary(),
            extended: default_extended(),
            continental: default_continental(),
            neighbors: default_neighbors(),
            primary_radius_km: default_primary_radius_km(),
        }
    }
}

/// `(threshold, points)` pairs; the first threshold that matches wins.
pub type Steps = Vec<(f64, i32)>;

fn default_magnitude_steps() -> Steps {
    vec![(7.0, 50), (6.0, 30), (5.0, 15), (4.0, 5)]
}
fn default_distance_steps() -> Steps {
    vec![(500.0, 20), (1000.0, 10), (2000.0, 5)]
}
fn default_baseline() -> i32 {
    100
}
fn default_primary_bonus() -> i32 {
    25
}
fn default_neighbor_bonus() -> i32 {
    15
}
fn default_level_breaks() -> [i32; 4] {
    [30, 50, 70, 85]
}
fn default_high_min_mag() -> f64 {
    5.5
}
fn default_moderate_min_mag() -> f64 {
    6.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRules {
    #[serde(default = "default_baseline")]
    pub baseline: i32,
    /// Magnitude at-or-above thresholds, descending.
    #[serde(default = "default_magnitude_steps")]
    pub magnitude_steps: Steps,
    #[serde(default = "default_primary_bonus")]
    pub primary_bonus: i32,
    #[serde(default = "default_neighbor_bonus")]
    pub neighbor_bonus: i32,
    /// Distance strictly-below thresholds, ascending.
    #[serde(default = "default_distance_steps")]
    pub distance_steps: Steps,
    /// Inclusive upper scores for Extreme, High, Moderate, Low.
    #[serde(default = "default_level_breaks")]
    pub level_breaks: [i32; 4],
    #[serde(default = "default_high_min_mag")]
    pub high_alert_min_magnitude: f64,
    #[serde(default = "default_moderate_min_mag")]
    pub moderate_alert_min_magnitude: f64,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            baseline: default_baseline(),
            magnitude_steps: default_magnitude_steps(),
            primary_bonus: default_primary_bonus(),
            neighbor_bonus: default_neighbor_bonus(),
            distance_steps: default_distance_steps(),
            level_breaks: default_level_breaks(),
            high_alert_min_magnitude: default_high_min_mag(),
            moderate_alert_min_magnitude: default_moderate_min_mag(),
        }
    }
}

/* ----------------------------
Classifier
---------------------------- */

type RegionPredicate = fn(&RegionRules, &SeismicEvent) -> bool;

fn in_primary(r: &RegionRules, ev: &SeismicEvent) -> bool {
    in_bounds(GeoPoint::new(ev.latitude, ev.longitude), &r.primary)
}

fn in_neighbor(r: &RegionRules, ev: &SeismicEvent) -> bool {
    matches_keyword(&ev.place, &r.neighbors)
}

fn in_extended(r: &RegionRules, ev: &SeismicEvent) -> bool {
    in_bounds(GeoPoint::new(ev.latitude, ev.longitude), &r.extended)
}

/// Evaluated top to bottom; the first matching predicate decides the tag.
const REGION_TABLE: [(RegionTag, RegionPredicate); 3] = [
    (RegionTag::Primary, in_primary),
    (RegionTag::Neighbor, in_neighbor),
    (RegionTag::Extended, in_extended),
];

/// Everything the dispatcher and renderer need to know about one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub tag: RegionTag,
    pub distance_km: f64,
    pub score: i32,
    pub level: AlertLevel,
    pub should_alert: bool,
    /// Raw membership flags; the tag alone hides lower-priority matches.
    pub in_extended: bool,
    pub in_continental: bool,
    pub neighbor: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    pub regions: RegionRules,
    pub scoring: ScoringRules,
}

impl Classifier {
    pub fn new(regions: RegionRules, scoring: ScoringRules) -> Self {
        Self { regions, scoring }
    }

    pub fn classify_region_tag(&self, ev: &SeismicEvent) -> RegionTag {
        REGION_TABLE
            .iter()
            .find(|(_, pred)| pred(&self.regions, ev))
            .map(|(tag, _)| *tag)
            .unwrap_or(RegionTag::None)
    }

    pub fn distance_from_anchor(&self, ev: &SeismicEvent) -> f64 {
        let a = self.regions.anchor;
        distance_km(a.lat, a.lng, ev.latitude, ev.longitude)
    }

    pub fn priority_score(&self, magnitude: f64, distance_km: f64, tag: RegionTag) -> i32 {
        let s = &self.scoring;
        let mut score = s.baseline;

        if let Some((_, pts)) = s.magnitude_steps.iter().find(|(min, _)| magnitude >= *min) {
            score -= pts;
        }

        // Exactly one location adjustment.
        score -= match tag {
            RegionTag::Primary => s.primary_bonus,
            RegionTag::Neighbor => s.neighbor_bonus,
            _ => s
                .distance_steps
                .iter()
                .find(|(max, _)| distance_km < *max)
                .map(|(_, pts)| *pts)
                .unwrap_or(0),
        };
        score
    }

    pub fn alert_level(&self, score: i32) -> AlertLevel {
        let [extreme, high, moderate, low] = self.scoring.level_breaks;
        if score <= extreme {
            AlertLevel::Extreme
        } else if score <= high {
            AlertLevel::High
        } else if score <= moderate {
            AlertLevel::Moderate
        } else if score <= low {
            AlertLevel::Low
        } else {
            AlertLevel::Info
        }
    }

    /// Magnitude gate on top of the level for broad (mention) delivery.
    pub fn should_alert(&self, level: AlertLevel, magnitude: f64) -> bool {
        match level {
            AlertLevel::Extreme => true,
            AlertLevel::High => magnitude >= self.scoring.high_alert_min_magnitude,
            AlertLevel::Moderate => magnitude >= self.scoring.moderate_alert_min_magnitude,
            AlertLevel::Low | AlertLevel::Info => false,
        }
    }

    pub fn classify(&self, ev: &SeismicEvent) -> Classification {
        let tag = self.classify_region_tag(ev);
        let distance_km = self.distance_from_anchor(ev);
        let score = self.priority_score(ev.magnitude, distance_km, tag);
        let level = self.alert_level(score);
        Classification {
            tag,
            distance_km,
            score,
            level,
            should_alert: self.should_alert(level, ev.magnitude),
            in_extended: in_extended(&self.regions, ev),
            in_continental: in_bounds(
                GeoPoint::new(ev.latitude, ev.longitude),
                &self.regions.continental,
            ),
            neighbor: in_neighbor(&self.regions, ev),
        }
    }

    /// Human-readable impact text for the anchor country.
    pub fn impact_assessment(&self, magnitude: f64, c: &Classification) -> String {
        let home = &self.regions.home_label;
        if c.tag == RegionTag::Primary && magnitude >= 5.0 {
            format!("Significant shaking may be felt across {home}. Monitor for possible damage and aftershocks.")
        } else if c.tag == RegionTag::Primary && magnitude >= 4.0 {
            format!("Light to moderate shaking may be felt in parts of {home}. Generally low risk of damage.")
        } else if c.neighbor && magnitude >= 6.0 {
            format!("Strong earthquake in neighboring country. May be felt in border regions of {home}.")
        } else if c.distance_km < 500.0 && magnitude >= 6.5 {
            format!("Major earthquake near {home}. Monitor for possible effects.")
        } else if c.distance_km < 1000.0 && magnitude >= 7.0 {
            "Significant regional earthquake. Check for tsunami warnings if near coast.".to_string()
        } else {
            format!("No direct impact expected for {home}.")
        }
    }
}
