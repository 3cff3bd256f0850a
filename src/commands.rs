//! Command surface: the setup / remove / recent-events actions a community
//! member triggers. Transport-agnostic; the HTTP routes in `api` and any chat
//! front-end call these.

use anyhow::Result;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::feed::types::FeedProvider;
use crate::geo::{Classifier, RegionTag};
use crate::notify::render::{render_recent, RenderSettings};
use crate::notify::AlertMessage;
use crate::registry::{Destination, FocusRegion, Registry, WriteOutcome};

pub const DEFAULT_RECENT_COUNT: u8 = 3;
pub const MAX_RECENT_COUNT: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
}

/// Chat-platform channel lookup/creation inside one community.
#[async_trait::async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn find_text_channel(&self, community_id: &str, name: &str) -> Result<Option<ChannelRef>>;
    async fn create_text_channel(&self, community_id: &str, name: &str) -> Result<ChannelRef>;
}

/// Used when no bot token is configured: every lookup fails.
pub struct OfflineDirectory;

#[async_trait::async_trait]
impl ChannelDirectory for OfflineDirectory {
    async fn find_text_channel(&self, _community_id: &str, _name: &str) -> Result<Option<ChannelRef>> {
        Err(anyhow::anyhow!("chat platform not configured (DISCORD_TOKEN unset)"))
    }

    async fn create_text_channel(&self, _community_id: &str, _name: &str) -> Result<ChannelRef> {
        Err(anyhow::anyhow!("chat platform not configured (DISCORD_TOKEN unset)"))
    }
}

/// Chat platforms want lowercase, dash-separated channel names.
pub fn normalize_channel_name(raw: &str) -> String {
    static RE_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").expect("separator regex"));
    static RE_BAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\-]").expect("charset regex"));
    let lowered = raw.trim().trim_start_matches('#').to_lowercase();
    let dashed = RE_SEP.replace_all(&lowered, "-");
    let cleaned = RE_BAD.replace_all(&dashed, "");
    cleaned.trim_matches('-').chars().take(100).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupRequest {
    pub community_id: String,
    #[serde(default)]
    pub community_name: String,
    pub channel: String,
    #[serde(default)]
    pub region: Option<FocusRegion>,
    #[serde(default)]
    pub min_magnitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReply {
    pub channel: ChannelRef,
    pub created: bool,
    pub focus_region: FocusRegion,
    pub queued: bool,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("channel name `{0}` is not usable")]
    InvalidChannel(String),
    #[error("failed to create channel #{0}: {1}")]
    CreateChannel(String, anyhow::Error),
    #[error("channel lookup failed: {0}")]
    Lookup(anyhow::Error),
    #[error("minimum magnitude must be between 0 and 10")]
    InvalidMagnitude,
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(f) => f.to_uppercase().chain(c).collect(),
        None => String::new(),
    }
}

/// Point a community's alerts at a named text channel, creating it if absent.
pub async fn setup_destination(
    registry: &Registry,
    directory: &dyn ChannelDirectory,
    req: SetupRequest,
) -> Result<SetupReply, CommandError> {
    let name = normalize_channel_name(&req.channel);
    if name.is_empty() {
        return Err(CommandError::InvalidChannel(req.channel));
    }
    if let Some(m) = req.min_magnitude {
        if !(0.0..=10.0).contains(&m) {
            return Err(CommandError::InvalidMagnitude);
        }
    }

    let existing = directory
        .find_text_channel(&req.community_id, &name)
        .await
        .map_err(CommandError::Lookup)?;
    let (channel, created) = match existing {
        Some(ch) => (ch, false),
        None => {
            let ch = directory
                .create_text_channel(&req.community_id, &name)
                .await
                .map_err(|e| CommandError::CreateChannel(name.clone(), e))?;
            tracing::info!(target: "commands", community = %req.community_id, channel = %ch.name, "created alert channel");
            (ch, true)
        }
    };

    let focus = req.region.unwrap_or_default();
    let dest = Destination {
        community_id: req.community_id.clone(),
        channel_id: channel.id.clone(),
        channel_name: channel.name.clone(),
        community_name: req.community_name,
        focus_region: focus,
        min_magnitude: req.min_magnitude,
        updated_at: Utc::now(),
    };
    let outcome = registry.upsert(dest).await;

    let mut message = String::new();
    if created {
        message.push_str(&format!(
            "✅ Channel #{} didn't exist, so I created it for you!\n",
            channel.name
        ));
    }
    message.push_str(&format!(
        "✅ Earthquake alerts will be sent to <#{}>!\nFocus region: **{}**",
        channel.id,
        capitalize(focus.as_str())
    ));
    if outcome == WriteOutcome::Queued {
        message.push_str(
            "\n⚠️ Note: Your configuration will be stored when database connection is restored.",
        );
    }

    Ok(SetupReply {
        channel,
        created,
        focus_region: focus,
        queued: outcome == WriteOutcome::Queued,
        message,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveReply {
    pub queued: bool,
    pub message: String,
}

pub async fn remove_destination(registry: &Registry, community_id: &str) -> RemoveReply {
    let outcome = registry.remove(community_id).await;
    let mut message = "✅ Earthquake alerts have been removed from this server.".to_string();
    if outcome == WriteOutcome::Queued {
        message.push_str("\n⚠️ Note: This change will be saved when database connection is restored.");
    }
    RemoveReply {
        queued: outcome == WriteOutcome::Queued,
        message,
    }
}

/// Backs the recent-events query: one feed (the last-day summary) plus the
/// classifier and render settings.
pub struct RecentEvents {
    pub feed: std::sync::Arc<dyn FeedProvider>,
    pub classifier: std::sync::Arc<Classifier>,
    pub render: RenderSettings,
    pub timeout: std::time::Duration,
}

impl RecentEvents {
    /// `count` is clamped to 1..=5 (default 3); `region` defaults to global.
    pub async fn query(&self, count: Option<u8>, region: Option<FocusRegion>) -> Result<AlertMessage> {
        let count = count
            .unwrap_or(DEFAULT_RECENT_COUNT)
            .clamp(1, MAX_RECENT_COUNT) as usize;
        let region = region.unwrap_or_default();

        let events = tokio::time::timeout(self.timeout, self.feed.fetch_latest())
            .await
            .map_err(|_| anyhow::anyhow!("recent feed timed out after {:?}", self.timeout))??;

        let rules = &self.classifier.regions;
        let mut items: Vec<_> = events
            .into_iter()
            .map(|ev| {
                let c = self.classifier.classify(&ev);
                (ev, c)
            })
            .filter(|(_, c)| match region {
                FocusRegion::Global => true,
                FocusRegion::Primary => {
                    c.tag == RegionTag::Primary || c.distance_km <= rules.primary_radius_km
                }
                FocusRegion::Extended => c.in_extended || c.neighbor,
                FocusRegion::Continental => c.in_continental || c.tag != RegionTag::None,
            })
            .collect();

        // Newest first.
        items.sort_by(|a, b| b.0.occurred_at.cmp(&a.0.occurred_at));
        items.truncate(count);
        Ok(render_recent(&items, region, &self.render))
    }
}
