//! Pure rendering of notification records into chat messages. No I/O.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertMessage, Embed, EmbedField, EmbedFooter, EmbedImage};
use crate::feed::types::SeismicEvent;
use crate::geo::{Classification, RegionRules, RegionTag};
use crate::registry::FocusRegion;

const FOOTER_TEXT: &str = "Data source: USGS Earthquake Hazards Program";
const FOOTER_ICON: &str = "https://earthquake.usgs.gov/theme/images/logo.png";

fn default_utc_offset_hours() -> i32 {
    7
}
fn default_tz_label() -> String {
    "Bangkok, GMT+7".to_string()
}

/// Local-time presentation for rendered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_tz_label")]
    pub tz_label: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            tz_label: default_tz_label(),
        }
    }
}

/// Labels and clock the renderer needs; built once at startup.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub anchor_label: String,
    pub home_label: String,
    pub primary_label: String,
    pub extended_label: String,
    pub offset: FixedOffset,
    pub tz_label: String,
}

impl RenderSettings {
    pub fn new(regions: &RegionRules, display: &DisplayConfig) -> Self {
        let offset = FixedOffset::east_opt(display.utc_offset_hours.clamp(-14, 14) * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self {
            anchor_label: regions.anchor_label.clone(),
            home_label: regions.home_label.clone(),
            primary_label: regions.primary.name.clone(),
            extended_label: regions.extended.name.clone(),
            offset,
            tz_label: display.tz_label.clone(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::new(&RegionRules::default(), &DisplayConfig::default())
    }
}

/// What the pipeline hands the renderer for one event.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: SeismicEvent,
    pub class: Classification,
    pub impact: String,
}

pub fn magnitude_color(magnitude: f64) -> u32 {
    if magnitude >= 7.0 {
        0x990000
    } else if magnitude >= 6.0 {
        0xFF0000
    } else if magnitude >= 5.0 {
        0xFF9900
    } else if magnitude >= 4.0 {
        0xFFCC00
    } else {
        0xFFFF00
    }
}

/// e.g. "Mar 28, 2025, 01:20:54 PM"
pub fn format_local_time(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset)
        .format("%b %-d, %Y, %I:%M:%S %p")
        .to_string()
}

/// Severity-gated banner. Only banners that start with `@everyone` ping.
pub fn alert_banner(n: &Notification, s: &RenderSettings) -> String {
    let mag = n.event.magnitude;
    let c = &n.class;
    if c.tag == RegionTag::Primary && mag >= 4.5 {
        format!(
            "@everyone 🚨 **URGENT! EARTHQUAKE NEAR {}** 🚨",
            s.home_label.to_uppercase()
        )
    } else if (c.in_extended || c.neighbor) && mag >= 5.5 {
        format!(
            "@everyone 🚨 **ALERT! EARTHQUAKE IN {}** 🚨",
            s.extended_label.to_uppercase()
        )
    } else if mag >= 7.0 {
        "@everyone 🚨 **MAJOR GLOBAL EARTHQUAKE ALERT** 🚨".to_string()
    } else if c.should_alert {
        "@everyone 🚨 **EARTHQUAKE ALERT** 🚨".to_string()
    } else {
        "🚨 **EARTHQUAKE ALERT** 🚨".to_string()
    }
}

fn location_tag(c: &Classification, s: &RenderSettings) -> String {
    match c.tag {
        RegionTag::Primary => format!("[{}] ", s.primary_label.to_uppercase()),
        RegionTag::Neighbor => "[NEIGHBORING COUNTRY] ".to_string(),
        _ if c.in_extended => format!("[{}] ", s.extended_label.to_uppercase()),
        _ => String::new(),
    }
}

fn place_or_unknown(ev: &SeismicEvent) -> &str {
    if ev.place.trim().is_empty() {
        "Unknown Location"
    } else {
        &ev.place
    }
}

fn maps_url(ev: &SeismicEvent) -> String {
    format!(
        "https://www.google.com/maps?q={},{}&z=8",
        ev.latitude, ev.longitude
    )
}

fn base_embed(ev: &SeismicEvent, c: &Classification, s: &RenderSettings, head: &str) -> Embed {
    let place = place_or_unknown(ev);
    let description = format!(
        "{head}**Time ({tz}):** {time}\n\
         **Depth:** {depth:.1} km\n\
         **Coordinates:** [{lat:.4}, {lng:.4}]({maps})\n\
         **Distance from {anchor}:** {dist:.0} km",
        tz = s.tz_label,
        time = format_local_time(ev.occurred_at, s.offset),
        depth = ev.depth_km,
        lat = ev.latitude,
        lng = ev.longitude,
        maps = maps_url(ev),
        anchor = s.anchor_label,
        dist = c.distance_km,
    );
    Embed {
        title: format!(
            "{}Magnitude {:.1} Earthquake {}",
            location_tag(c, s),
            ev.magnitude,
            place
        ),
        description,
        color: magnitude_color(ev.magnitude),
        thumbnail: Some(EmbedImage {
            url: format!(
                "https://earthquake.usgs.gov/images/globes/{}{}/en-US.jpg",
                ev.latitude.round() as i64,
                ev.longitude.round() as i64
            ),
        }),
        fields: vec![
            EmbedField {
                name: "Magnitude".into(),
                value: format!("**{:.1}**", ev.magnitude),
                inline: true,
            },
            EmbedField {
                name: "Region".into(),
                value: place.to_string(),
                inline: true,
            },
            EmbedField {
                name: "Depth".into(),
                value: format!("{:.1} km", ev.depth_km),
                inline: true,
            },
        ],
        footer: Some(EmbedFooter {
            text: FOOTER_TEXT.into(),
            icon_url: Some(FOOTER_ICON.into()),
        }),
        timestamp: Some(ev.occurred_at.to_rfc3339()),
    }
}

/// Full alert for one new event.
pub fn render_alert(n: &Notification, s: &RenderSettings) -> AlertMessage {
    let head = format!("**Alert Level:** {}\n", n.class.level.label());
    let mut embed = base_embed(&n.event, &n.class, s, &head);
    embed.description.push_str(&format!(
        "\n\n**Impact Assessment:** {}\n\n[View USGS Details]({})",
        n.impact, n.event.details_url
    ));
    AlertMessage {
        content: Some(alert_banner(n, s)),
        embeds: vec![embed],
    }
}

/// Listing for the recent-events query. The title counts the events shown,
/// which can be fewer than requested.
pub fn render_recent(
    items: &[(SeismicEvent, Classification)],
    region: FocusRegion,
    s: &RenderSettings,
) -> AlertMessage {
    if items.is_empty() {
        return AlertMessage {
            content: Some(
                "No earthquake data found in the specified region in the last 24 hours."
                    .to_string(),
            ),
            embeds: Vec::new(),
        };
    }
    let scope = match region {
        FocusRegion::Primary => format!("in {} Region", s.home_label),
        FocusRegion::Extended => format!("in {}", s.extended_label),
        FocusRegion::Continental | FocusRegion::Global => "Global".to_string(),
    };
    let title = if region == FocusRegion::Primary || region == FocusRegion::Extended {
        format!("🔍 **Latest {} Earthquakes {}**", items.len(), scope)
    } else {
        format!("🔍 **Latest {} {} Earthquakes**", items.len(), scope)
    };
    let embeds = items
        .iter()
        .map(|(ev, c)| {
            let mut e = base_embed(ev, c, s, "");
            e.description
                .push_str(&format!("\n\n[View USGS Details]({})", ev.details_url));
            e
        })
        .collect();
    AlertMessage {
        content: Some(title),
        embeds,
    }
}
