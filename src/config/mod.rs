// src/config/mod.rs
//! Service configuration: TOML file with serde defaults, then env overrides.
//!
//! Lookup order for the file:
//! 1) `$QUAKE_CONFIG_PATH` (must exist)
//! 2) `config/quake.toml`
//! 3) built-in defaults

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::{DEFAULT_KEEP_IDS, DEFAULT_MAX_IDS};
use crate::feed::usgs::{ALL_HOUR_URL, M25_HOUR_URL, M45_DAY_URL, M45_HOUR_URL};
use crate::geo::{RegionRules, ScoringRules};
use crate::notify::render::DisplayConfig;
use crate::pipeline::MagnitudeThresholds;

pub const ENV_CONFIG_PATH: &str = "QUAKE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/quake.toml";

fn default_endpoints() -> Vec<String> {
    vec![
        ALL_HOUR_URL.to_string(),
        M45_HOUR_URL.to_string(),
        M25_HOUR_URL.to_string(),
    ]
}
fn default_recent_endpoint() -> String {
    M45_DAY_URL.to_string()
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    /// Feed used by the recent-events query.
    #[serde(default = "default_recent_endpoint")]
    pub recent_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            recent_endpoint: default_recent_endpoint(),
            timeout_ms: default_timeout_ms(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl FeedSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_max_ids() -> usize {
    DEFAULT_MAX_IDS
}
fn default_keep_ids() -> usize {
    DEFAULT_KEEP_IDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSection {
    #[serde(default = "default_max_ids")]
    pub max_ids: usize,
    #[serde(default = "default_keep_ids")]
    pub keep_ids: usize,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            max_ids: default_max_ids(),
            keep_ids: default_keep_ids(),
        }
    }
}

fn default_backoff_secs() -> u64 {
    60
}
fn default_max_pending() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// JSON file for destinations; `None` keeps them in memory only.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            path: None,
            backoff_secs: default_backoff_secs(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_api_base() -> String {
    crate::notify::discord::DEFAULT_API_BASE.to_string()
}
fn default_retries() -> u8 {
    3
}
fn default_send_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordSection {
    /// Usually supplied via `DISCORD_TOKEN` instead.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_retries")]
    pub retries: u8,
    #[serde(default = "default_send_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            token: None,
            webhook_url: None,
            api_base: default_api_base(),
            retries: default_retries(),
            timeout_secs: default_send_timeout_secs(),
        }
    }
}

fn default_keep_alive_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub period_secs: u64,
}

impl Default for KeepAliveSection {
    fn default() -> Self {
        Self {
            url: None,
            period_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub discord: DiscordSection,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub regions: RegionRules,
    #[serde(default)]
    pub scoring: ScoringRules,
    #[serde(default)]
    pub thresholds: MagnitudeThresholds,
    #[serde(default)]
    pub keep_alive: KeepAliveSection,
}

impl MonitorConfig {
    /// Parse a TOML file. Env overrides are not applied here.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: MonitorConfig =
            toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// File per the lookup order, then env overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(&p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path {p}"));
            }
            Self::load_from_file(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from_file(&default_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env()?;
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_nonempty("DISCORD_TOKEN") {
            self.discord.token = Some(v);
        }
        if let Some(v) = env_nonempty("WEBHOOK_URL") {
            self.discord.webhook_url = Some(v);
        }
        if let Some(v) = env_nonempty("CHECK_INTERVAL_SECS") {
            self.feed.interval_secs = v
                .parse()
                .with_context(|| format!("CHECK_INTERVAL_SECS is not a number: {v}"))?;
        }
        if let Some(v) = env_nonempty("FETCH_TIMEOUT_MS") {
            self.feed.timeout_ms = v
                .parse()
                .with_context(|| format!("FETCH_TIMEOUT_MS is not a number: {v}"))?;
        }
        if let Some(v) = env_nonempty("DESTINATIONS_PATH") {
            self.registry.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_nonempty("KEEP_ALIVE_URL") {
            self.keep_alive.url = Some(v);
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        self.feed.endpoints = clean_list(std::mem::take(&mut self.feed.endpoints));
        if self.feed.endpoints.is_empty() {
            self.feed.endpoints = default_endpoints();
        }
        if self.feed.interval_secs == 0 {
            self.feed.interval_secs = default_interval_secs();
        }
        if self.feed.timeout_ms == 0 {
            self.feed.timeout_ms = default_timeout_ms();
        }
        if self.dedup.max_ids == 0 {
            self.dedup.max_ids = default_max_ids();
        }
        if self.dedup.keep_ids > self.dedup.max_ids {
            self.dedup.keep_ids = self.dedup.max_ids;
        }
        if self.registry.backoff_secs == 0 {
            self.registry.backoff_secs = default_backoff_secs();
        }
        if self.registry.max_pending == 0 {
            self.registry.max_pending = default_max_pending();
        }
        if self.keep_alive.period_secs == 0 {
            self.keep_alive.period_secs = default_keep_alive_secs();
        }
        let fallback = MagnitudeThresholds::default();
        for (t, default) in [
            (&mut self.thresholds.global, fallback.global),
            (&mut self.thresholds.primary, fallback.primary),
            (&mut self.thresholds.extended, fallback.extended),
            (&mut self.thresholds.continental, fallback.continental),
        ] {
            // TOML accepts `nan` and `inf`; neither compares sensibly.
            if !t.is_finite() {
                *t = default;
            } else if !(0.0..=10.0).contains(t) {
                *t = t.clamp(0.0, 10.0);
            }
        }
        // Blank strings from TOML or env mean "unset".
        for opt in [
            &mut self.discord.token,
            &mut self.discord.webhook_url,
            &mut self.keep_alive.url,
        ] {
            if opt.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *opt = None;
            }
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trim, drop empties and duplicates; order preserved.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}
