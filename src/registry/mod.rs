// src/registry/mod.rs
//! Destination registry: which channel in which community receives alerts,
//! and with what focus region.
//!
//! Reads never fail the caller. While the backing store is unreachable,
//! writes are queued and replayed in FIFO order by the reconnect task.

pub mod json_file;
pub mod memory;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusRegion {
    #[default]
    Global,
    #[serde(alias = "thailand")]
    Primary,
    #[serde(alias = "sea")]
    Extended,
    #[serde(alias = "asia")]
    Continental,
}

impl FocusRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            FocusRegion::Global => "global",
            FocusRegion::Primary => "primary",
            FocusRegion::Extended => "extended",
            FocusRegion::Continental => "continental",
        }
    }
}

impl std::str::FromStr for FocusRegion {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "global" => Ok(FocusRegion::Global),
            "primary" | "thailand" => Ok(FocusRegion::Primary),
            "extended" | "sea" => Ok(FocusRegion::Extended),
            "continental" | "asia" => Ok(FocusRegion::Continental),
            other => Err(RegistryError::InvalidFocus(other.to_string())),
        }
    }
}

/// Persisted destination record, keyed by `community_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub community_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub community_name: String,
    #[serde(default)]
    pub focus_region: FocusRegion,
    /// Overrides the configured per-focus threshold when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_magnitude: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("unknown focus region `{0}`")]
    InvalidFocus(String),
}

/// Backing store. Implementations report outages as errors; the
/// [`Registry`] decides how to degrade.
#[async_trait::async_trait]
pub trait DestinationStore: Send + Sync {
    async fn connect(&self) -> Result<(), RegistryError>;
    async fn load_all(&self) -> Result<Vec<Destination>, RegistryError>;
    async fn upsert(&self, dest: &Destination) -> Result<(), RegistryError>;
    /// Returns whether a record was deleted.
    async fn remove(&self, community_id: &str) -> Result<bool, RegistryError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    Upsert(Destination),
    Remove(String),
}

impl PendingOp {
    fn community_id(&self) -> &str {
        match self {
            PendingOp::Upsert(d) => &d.community_id,
            PendingOp::Remove(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Store unreachable; the write will be replayed on reconnect.
    Queued,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub backoff: Duration,
    pub max_pending: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(60),
            max_pending: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub remaining: usize,
}

pub struct Registry {
    store: Arc<dyn DestinationStore>,
    policy: ReconnectPolicy,
    connected: AtomicBool,
    /// Last-known snapshot, with queued writes already applied.
    cache: RwLock<HashMap<String, Destination>>,
    pending: Mutex<VecDeque<PendingOp>>,
    /// Held by every write and by replay, so store writes land in call order.
    write_gate: tokio::sync::Mutex<()>,
}

impl Registry {
    pub fn new(store: Arc<dyn DestinationStore>, policy: ReconnectPolicy) -> Self {
        Self {
            store,
            policy,
            connected: AtomicBool::new(false),
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending mutex poisoned").len()
    }

    pub fn pending_snapshot(&self) -> Vec<PendingOp> {
        self.pending
            .lock()
            .expect("pending mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Current destinations by community id. Never fails: when the store is
    /// down this is the last-known snapshot (possibly empty).
    pub async fn get_all(&self) -> HashMap<String, Destination> {
        match self.load_from_store().await {
            Ok(fresh) => {
                let mut map: HashMap<String, Destination> = fresh
                    .into_iter()
                    .map(|d| (d.community_id.clone(), d))
                    .collect();
                // Writes not yet replayed still win over stored state.
                for op in self.pending_snapshot() {
                    apply_op(&mut map, op);
                }
                *self.cache.write().expect("cache rwlock poisoned") = map.clone();
                map
            }
            Err(e) => {
                self.mark_disconnected();
                let cached = self.cache.read().expect("cache rwlock poisoned").clone();
                tracing::warn!(
                    target: "registry",
                    error = %e,
                    cached = cached.len(),
                    "destination store unavailable, serving cached snapshot"
                );
                cached
            }
        }
    }

    async fn load_from_store(&self) -> Result<Vec<Destination>, RegistryError> {
        if !self.is_connected() {
            self.store.connect().await?;
            self.connected.store(true, Ordering::SeqCst);
        }
        self.store.load_all().await
    }

    pub async fn upsert(&self, dest: Destination) -> WriteOutcome {
        tracing::info!(
            target: "registry",
            community = %dest.community_id,
            channel = %dest.channel_id,
            focus = dest.focus_region.as_str(),
            "setting destination"
        );
        self.write(PendingOp::Upsert(dest)).await
    }

    pub async fn remove(&self, community_id: &str) -> WriteOutcome {
        tracing::info!(target: "registry", community = %community_id, "removing destination");
        self.write(PendingOp::Remove(community_id.to_string())).await
    }

    async fn write(&self, op: PendingOp) -> WriteOutcome {
        // The empty check, the store call and the enqueue form one step; a
        // write must not overtake an older one that is still failing.
        let _gate = self.write_gate.lock().await;
        apply_op(&mut self.cache.write().expect("cache rwlock poisoned"), op.clone());

        if self.pending_len() == 0 {
            match self.apply_to_store(&op).await {
                Ok(()) => return WriteOutcome::Applied,
                Err(e) => {
                    tracing::warn!(
                        target: "registry",
                        error = %e,
                        community = op.community_id(),
                        "write failed, queueing for replay"
                    );
                    self.mark_disconnected();
                }
            }
        }
        self.enqueue(op);
        WriteOutcome::Queued
    }

    async fn apply_to_store(&self, op: &PendingOp) -> Result<(), RegistryError> {
        if !self.is_connected() {
            self.store.connect().await?;
            self.connected.store(true, Ordering::SeqCst);
        }
        match op {
            PendingOp::Upsert(d) => self.store.upsert(d).await,
            PendingOp::Remove(id) => self.store.remove(id).await.map(|_| ()),
        }
    }

    fn enqueue(&self, op: PendingOp) {
        let mut q = self.pending.lock().expect("pending mutex poisoned");
        if q.len() >= self.policy.max_pending {
            if let Some(dropped) = q.pop_front() {
                tracing::warn!(
                    target: "registry",
                    community = dropped.community_id(),
                    max = self.policy.max_pending,
                    "pending queue full, dropping oldest write"
                );
            }
        }
        q.push_back(op);
        gauge!("registry_pending_ops").set(q.len() as f64);
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Replay queued writes oldest first. Stops at the first failure; that op
    /// and everything behind it stay queued for the next attempt.
    pub async fn replay_pending(&self) -> ReplayReport {
        let _gate = self.write_gate.lock().await;
        let mut applied = 0usize;
        loop {
            let next = self
                .pending
                .lock()
                .expect("pending mutex poisoned")
                .front()
                .cloned();
            let Some(op) = next else { break };

            match self.apply_to_store(&op).await {
                Ok(()) => {
                    let mut q = self.pending.lock().expect("pending mutex poisoned");
                    // The queue may have been trimmed meanwhile; only pop what we applied.
                    if q.front() == Some(&op) {
                        q.pop_front();
                    }
                    applied += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "registry",
                        error = %e,
                        community = op.community_id(),
                        "replay failed, will retry"
                    );
                    self.mark_disconnected();
                    break;
                }
            }
        }
        let remaining = self.pending_len();
        gauge!("registry_pending_ops").set(remaining as f64);
        ReplayReport { applied, remaining }
    }

    /// One reconnection attempt: connect, then replay the queue.
    pub async fn reconnect_once(&self) -> Result<ReplayReport, RegistryError> {
        self.store.connect().await.inspect_err(|_| self.mark_disconnected())?;
        self.connected.store(true, Ordering::SeqCst);
        let report = self.replay_pending().await;
        if report.applied > 0 {
            tracing::info!(
                target: "registry",
                applied = report.applied,
                remaining = report.remaining,
                "replayed pending destination writes"
            );
        }
        Ok(report)
    }

    /// Background reconnect loop on the fixed policy backoff. Independent of
    /// the pipeline timer; only does work while disconnected or with a backlog.
    pub fn spawn_reconnect_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.policy.backoff).await;
                if self.is_connected() && self.pending_len() == 0 {
                    continue;
                }
                tracing::info!(target: "registry", pending = self.pending_len(), "attempting store reconnection");
                if let Err(e) = self.reconnect_once().await {
                    tracing::warn!(target: "registry", error = %e, "reconnection failed");
                }
            }
        })
    }
}

fn apply_op(map: &mut HashMap<String, Destination>, op: PendingOp) {
    match op {
        PendingOp::Upsert(d) => {
            map.insert(d.community_id.clone(), d);
        }
        PendingOp::Remove(id) => {
            map.remove(&id);
        }
    }
}
