// tests/scheduler_ticks.rs
//
// Scheduler timing on paused tokio time: immediate first tick, one tick per
// interval, serialized ticks, delayed (not bursting) catch-up, and teardown.

use async_trait::async_trait;
use quake_alert::dedup::DedupStore;
use quake_alert::feed::types::{FeedProvider, FetchError};
use quake_alert::geo::Classifier;
use quake_alert::notify::MemoryNotifier;
use quake_alert::pipeline::Pipeline;
use quake_alert::registry::memory::MemoryStore;
use quake_alert::registry::{ReconnectPolicy, Registry};
use quake_alert::scheduler::{spawn_scheduler, BackgroundTasks};
use quake_alert::SeismicEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const INTERVAL: Duration = Duration::from_secs(30);

/// Counts fetches; the first one optionally takes `slow_first`.
#[derive(Default)]
struct CountingFeed {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    slow_first: Option<Duration>,
}

#[async_trait]
impl FeedProvider for CountingFeed {
    async fn fetch_latest(&self) -> Result<Vec<SeismicEvent>, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let (0, Some(d)) = (n, self.slow_first) {
            sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn pipeline(feed: Arc<CountingFeed>) -> Arc<Pipeline> {
    let store = Arc::new(MemoryStore::new());
    let feed: Arc<dyn FeedProvider> = feed;
    Arc::new(
        Pipeline::new(
            vec![feed],
            Arc::new(DedupStore::default()),
            Arc::new(Registry::new(store, ReconnectPolicy::default())),
            Arc::new(Classifier::default()),
            Arc::new(MemoryNotifier::new()),
        )
        .with_fetch_timeout(Duration::from_secs(600)),
    )
}

async fn sleep_until_offset(start: Instant, offset: Duration) {
    tokio::time::sleep_until(start + offset).await;
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_immediate_then_one_per_interval() {
    let feed = Arc::new(CountingFeed::default());
    let start = Instant::now();
    let task = spawn_scheduler(pipeline(feed.clone()), INTERVAL);

    sleep_until_offset(start, Duration::from_millis(1)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

    sleep_until_offset(start, Duration::from_secs(29)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

    sleep_until_offset(start, Duration::from_secs(31)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

    sleep_until_offset(start, Duration::from_secs(91)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 4);
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn slow_tick_delays_schedule_without_overlap() {
    let feed = Arc::new(CountingFeed {
        slow_first: Some(Duration::from_secs(100)),
        ..Default::default()
    });
    let start = Instant::now();
    let task = spawn_scheduler(pipeline(feed.clone()), INTERVAL);

    // Ticks due at 30, 60 and 90 s pass while the first one is still running.
    sleep_until_offset(start, Duration::from_secs(99)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

    // One catch-up tick when it finishes, not a burst of three.
    sleep_until_offset(start, Duration::from_secs(110)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

    // Schedule restarts from the late tick: next one at 100 + 30 s.
    sleep_until_offset(start, Duration::from_secs(129)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    sleep_until_offset(start, Duration::from_secs(131)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 3);

    assert_eq!(feed.max_in_flight.load(Ordering::SeqCst), 1);
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn zero_interval_uses_default() {
    let feed = Arc::new(CountingFeed::default());
    let start = Instant::now();
    let task = spawn_scheduler(pipeline(feed.clone()), Duration::ZERO);

    sleep_until_offset(start, Duration::from_secs(29)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    sleep_until_offset(start, Duration::from_secs(31)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn dropping_background_tasks_stops_ticks() {
    let feed = Arc::new(CountingFeed::default());
    let start = Instant::now();
    let mut tasks = BackgroundTasks::new();
    tasks.push("scheduler", spawn_scheduler(pipeline(feed.clone()), INTERVAL));
    assert_eq!(tasks.len(), 1);

    sleep_until_offset(start, Duration::from_secs(31)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

    drop(tasks);
    sleep_until_offset(start, Duration::from_secs(300)).await;
    assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_every_task() {
    let feed = Arc::new(CountingFeed::default());
    let registry = Arc::new(Registry::new(
        Arc::new(MemoryStore::new()),
        ReconnectPolicy {
            backoff: Duration::from_secs(1),
            max_pending: 8,
        },
    ));
    let mut tasks = BackgroundTasks::new();
    tasks.push("scheduler", spawn_scheduler(pipeline(feed.clone()), INTERVAL));
    tasks.push("registry-reconnect", registry.clone().spawn_reconnect_task());

    sleep(Duration::from_millis(1)).await;
    tasks.shutdown();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    // Only the test holds the registry now; the reconnect task released its clone.
    assert_eq!(Arc::strong_count(&registry), 1);
}
