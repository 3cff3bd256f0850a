// src/app.rs
//! Wires config into the running service: feeds, dedup, registry, notifiers,
//! pipeline, background tasks and the HTTP router.

use anyhow::{Context, Result};
use axum::{Extension, Router};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{self, AppState};
use crate::commands::{ChannelDirectory, OfflineDirectory, RecentEvents};
use crate::config::MonitorConfig;
use crate::dedup::DedupStore;
use crate::feed::types::FeedProvider;
use crate::feed::usgs::UsgsFeed;
use crate::geo::Classifier;
use crate::metrics::Metrics;
use crate::notify::discord::{DiscordBot, DiscordWebhook};
use crate::notify::render::RenderSettings;
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::Pipeline;
use crate::registry::json_file::JsonFileStore;
use crate::registry::memory::MemoryStore;
use crate::registry::{DestinationStore, ReconnectPolicy, Registry};
use crate::scheduler::{spawn_scheduler, BackgroundTasks};

const USER_AGENT: &str = "QuakeAlertBot/1.0";

/// Everything the router and the background tasks share.
pub struct Components {
    pub pipeline: Arc<Pipeline>,
    pub registry: Arc<Registry>,
    pub state: AppState,
}

/// Build all components without spawning anything.
pub async fn components(cfg: &MonitorConfig) -> Result<Components> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("building HTTP client")?;

    let providers: Vec<Arc<dyn FeedProvider>> = cfg
        .feed
        .endpoints
        .iter()
        .map(|url| Arc::new(UsgsFeed::from_url(url.clone(), client.clone())) as Arc<dyn FeedProvider>)
        .collect();

    let store: Arc<dyn DestinationStore> = match &cfg.registry.path {
        Some(p) => Arc::new(JsonFileStore::new(p.clone())),
        None => {
            tracing::warn!(target: "registry", "no destinations path configured, destinations are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let registry = Arc::new(Registry::new(
        store,
        ReconnectPolicy {
            backoff: Duration::from_secs(cfg.registry.backoff_secs),
            max_pending: cfg.registry.max_pending,
        },
    ));
    if let Err(e) = registry.reconnect_once().await {
        tracing::warn!(target: "registry", error = %e, "destination store unavailable at startup, writes will queue");
    }

    let (notifier, directory): (Arc<dyn Notifier>, Arc<dyn ChannelDirectory>) =
        match &cfg.discord.token {
            Some(token) => {
                let bot = Arc::new(
                    DiscordBot::new(token.clone(), client.clone())
                        .with_api_base(cfg.discord.api_base.clone())
                        .with_timeout(cfg.discord.timeout_secs)
                        .with_retries(cfg.discord.retries),
                );
                let notifier: Arc<dyn Notifier> = bot.clone();
                let directory: Arc<dyn ChannelDirectory> = bot;
                (notifier, directory)
            }
            None => {
                tracing::warn!("DISCORD_TOKEN not set, alerts will only be logged");
                let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
                let directory: Arc<dyn ChannelDirectory> = Arc::new(OfflineDirectory);
                (notifier, directory)
            }
        };

    let webhook: Option<Arc<dyn Notifier>> = match cfg.discord.webhook_url.as_deref() {
        Some(url) => match DiscordWebhook::from_url(url, client.clone()) {
            Some(hook) => {
                let hook: Arc<dyn Notifier> = Arc::new(
                    hook.with_timeout(cfg.discord.timeout_secs)
                        .with_retries(cfg.discord.retries),
                );
                Some(hook)
            }
            None => {
                tracing::warn!("WEBHOOK_URL is not a Discord webhook URL, ignoring");
                None
            }
        },
        None => None,
    };

    let classifier = Arc::new(Classifier::new(cfg.regions.clone(), cfg.scoring.clone()));
    let render = RenderSettings::new(&cfg.regions, &cfg.display);
    let dedup = Arc::new(DedupStore::new(cfg.dedup.max_ids, cfg.dedup.keep_ids));

    let mut pipeline = Pipeline::new(
        providers,
        dedup,
        registry.clone(),
        classifier.clone(),
        notifier,
    )
    .with_fetch_timeout(cfg.feed.timeout())
    .with_thresholds(cfg.thresholds)
    .with_render(render.clone());
    if let Some(hook) = webhook {
        pipeline = pipeline.with_webhook(hook);
    }
    let pipeline = Arc::new(pipeline);

    let recent = Arc::new(RecentEvents {
        feed: Arc::new(UsgsFeed::from_url(cfg.feed.recent_endpoint.clone(), client)),
        classifier,
        render,
        timeout: cfg.feed.timeout(),
    });

    let state = AppState {
        registry: registry.clone(),
        directory,
        recent,
        pipeline: pipeline.clone(),
    };

    Ok(Components {
        pipeline,
        registry,
        state,
    })
}

/// Start the scheduler, reconnect and keep-alive tasks for `c`.
pub fn spawn_tasks(c: &Components, cfg: &MonitorConfig) -> BackgroundTasks {
    let mut tasks = BackgroundTasks::new();
    tasks.push("scheduler", spawn_scheduler(c.pipeline.clone(), cfg.feed.interval()));
    tasks.push("registry-reconnect", c.registry.clone().spawn_reconnect_task());
    if let Some(url) = cfg.keep_alive.url.clone() {
        tasks.push(
            "keep-alive",
            api::spawn_keep_alive(
                url,
                Duration::from_secs(cfg.keep_alive.period_secs),
                reqwest::Client::new(),
            ),
        );
    }
    tasks
}

/// Build the router and start the background tasks. The tasks live as long
/// as the router: they are aborted when the last clone of it is dropped.
pub async fn build(cfg: MonitorConfig) -> Result<Router> {
    let metrics = Metrics::init(&cfg)?;
    let c = components(&cfg).await?;
    let tasks = Arc::new(spawn_tasks(&c, &cfg));

    tracing::info!(
        endpoints = cfg.feed.endpoints.len(),
        interval_secs = cfg.feed.interval_secs,
        tasks = tasks.len(),
        "earthquake monitor started"
    );

    Ok(api::router(c.state)
        .merge(metrics.router())
        .layer(Extension(tasks)))
}
