// src/scheduler.rs
use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Run `Pipeline::run_tick` every `interval`, first tick immediately.
///
/// Ticks never overlap: the next one waits for the current tick to finish,
/// and a slow tick delays the schedule instead of bursting to catch up.
pub fn spawn_scheduler(pipeline: Arc<Pipeline>, interval: Duration) -> JoinHandle<()> {
    let interval = if interval.is_zero() { DEFAULT_INTERVAL } else { interval };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(target: "pipeline", interval_secs = interval.as_secs(), "scheduler started");
        loop {
            ticker.tick().await;
            let report = pipeline.run_tick().await;
            tracing::debug!(
                target: "pipeline",
                ok = report.endpoints_ok,
                failed_endpoints = report.endpoints_failed,
                fetched = report.fetched,
                new = report.new_events,
                delivered = report.delivered,
                "scheduler tick"
            );
        }
    })
}

/// Owns the service's long-running tasks. Dropping it (or calling
/// [`BackgroundTasks::shutdown`]) aborts all of them.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            handle.abort();
            tracing::debug!(task = name, "background task aborted");
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}
