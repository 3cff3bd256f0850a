use super::{AlertMessage, Notifier};
use crate::commands::{ChannelDirectory, ChannelRef};
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord channel types that accept plain messages.
const GUILD_TEXT: u8 = 0;
const GUILD_ANNOUNCEMENT: u8 = 5;
const VIEW_CHANNEL: u64 = 1 << 10;

/// Send with per-request timeout and exponential backoff between attempts.
async fn send_with_retries(
    build: impl Fn() -> RequestBuilder,
    timeout: Duration,
    max_retries: u8,
    what: &str,
) -> Result<reqwest::Response> {
    let max_retries = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let res = build().timeout(timeout).send().await;

        match res {
            Ok(rsp) => {
                if let Err(e) = rsp.error_for_status_ref() {
                    // 4xx other than rate limiting will not get better on retry.
                    let status = rsp.status();
                    let retriable = status.is_server_error() || status.as_u16() == 429;
                    if retriable && attempt < max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("{what} HTTP error: {e}"));
                }
                return Ok(rsp);
            }
            Err(e) => {
                if attempt < max_retries {
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                    continue;
                }
                return Err(anyhow!("{what} request failed: {e}"));
            }
        }
    }
}

/// Posts into guild channels as a bot user.
#[derive(Clone)]
pub struct DiscordBot {
    token: String,
    api_base: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordBot {
    pub fn new(token: String, client: Client) -> Self {
        Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordBot {
    async fn send(&self, channel_id: &str, msg: &AlertMessage) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        send_with_retries(
            || {
                self.client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, self.auth())
                    .json(msg)
            },
            self.timeout,
            self.max_retries,
            "Discord channel message",
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord-bot"
    }
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Serialize)]
struct PermissionOverwrite<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
}

#[derive(Serialize)]
struct CreateChannel<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    permission_overwrites: Vec<PermissionOverwrite<'a>>,
}

#[async_trait::async_trait]
impl ChannelDirectory for DiscordBot {
    async fn find_text_channel(&self, community_id: &str, name: &str) -> Result<Option<ChannelRef>> {
        let url = format!("{}/guilds/{}/channels", self.api_base, community_id);
        let rsp = send_with_retries(
            || {
                self.client
                    .get(&url)
                    .header(reqwest::header::AUTHORIZATION, self.auth())
            },
            self.timeout,
            self.max_retries,
            "Discord list channels",
        )
        .await?;
        let channels: Vec<ApiChannel> = rsp.json().await.context("decode guild channels")?;
        Ok(channels
            .into_iter()
            .filter(|c| c.kind == GUILD_TEXT || c.kind == GUILD_ANNOUNCEMENT)
            .find(|c| c.name.as_deref() == Some(name))
            .map(|c| ChannelRef {
                id: c.id,
                name: name.to_string(),
            }))
    }

    async fn create_text_channel(&self, community_id: &str, name: &str) -> Result<ChannelRef> {
        let url = format!("{}/guilds/{}/channels", self.api_base, community_id);
        // The @everyone role shares the guild id.
        let body = CreateChannel {
            name,
            kind: GUILD_TEXT,
            permission_overwrites: vec![PermissionOverwrite {
                id: community_id,
                kind: 0,
                allow: VIEW_CHANNEL.to_string(),
            }],
        };
        let rsp = send_with_retries(
            || {
                self.client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, self.auth())
                    .header("X-Audit-Log-Reason", "Created for earthquake alert notifications")
                    .json(&body)
            },
            self.timeout,
            self.max_retries,
            "Discord create channel",
        )
        .await?;
        let created: ApiChannel = rsp.json().await.context("decode created channel")?;
        Ok(ChannelRef {
            name: created.name.unwrap_or_else(|| name.to_string()),
            id: created.id,
        })
    }
}

/// Fixed webhook target; the channel id argument is ignored.
#[derive(Clone)]
pub struct DiscordWebhook {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordWebhook {
    pub fn new(webhook: String, client: Client) -> Self {
        Self {
            webhook,
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// Only real Discord webhook URLs are accepted.
    pub fn from_url(url: &str, client: Client) -> Option<Self> {
        url.starts_with("https://discord.com/api/webhooks/")
            .then(|| Self::new(url.to_string(), client))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordWebhook {
    async fn send(&self, _channel_id: &str, msg: &AlertMessage) -> Result<()> {
        send_with_retries(
            || self.client.post(&self.webhook).json(msg),
            self.timeout,
            self.max_retries,
            "Discord webhook",
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord-webhook"
    }
}
