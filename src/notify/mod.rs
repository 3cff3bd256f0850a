pub mod discord;
pub mod render;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Outgoing chat message (Discord message shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    /// ISO 8601
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// Delivery transport. `channel_id` is the destination's channel; sinks with
/// a fixed target (webhooks) ignore it.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel_id: &str, msg: &AlertMessage) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Stand-in used when no bot token is configured: logs instead of sending.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel_id: &str, msg: &AlertMessage) -> Result<()> {
        let title = msg.embeds.first().map(|e| e.title.as_str()).unwrap_or("");
        tracing::info!(target: "notify", channel = %channel_id, %title, "discord disabled (no DISCORD_TOKEN), alert logged only");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Records every message; channels listed in `failing` return an error.
/// Handy for tests and dry runs.
#[derive(Default)]
pub struct MemoryNotifier {
    pub sent: std::sync::Mutex<Vec<(String, AlertMessage)>>,
    failing: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_channel(&self, channel_id: &str) {
        self.failing
            .lock()
            .expect("notifier mutex poisoned")
            .insert(channel_id.to_string());
    }

    pub fn sent_channels(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .sent
            .lock()
            .expect("notifier mutex poisoned")
            .iter()
            .map(|(c, _)| c.clone())
            .collect();
        out.sort();
        out
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("notifier mutex poisoned").len()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, channel_id: &str, msg: &AlertMessage) -> Result<()> {
        if self
            .failing
            .lock()
            .expect("notifier mutex poisoned")
            .contains(channel_id)
        {
            anyhow::bail!("channel {channel_id} rejected the message");
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push((channel_id.to_string(), msg.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
