//! dedup.rs — bounded in-memory set of already-notified event ids.
//!
//! Process-lifetime only: a restart forgets everything, so the first tick
//! after a restart may repeat notifications. That is accepted.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::feed::types::SeismicEvent;

pub const DEFAULT_MAX_IDS: usize = 1000;
pub const DEFAULT_KEEP_IDS: usize = 500;

#[derive(Debug)]
pub struct DedupStore {
    inner: Mutex<Inner>,
    max_ids: usize,
    keep_ids: usize,
}

#[derive(Debug, Default)]
struct Inner {
    seen: HashSet<String>,
    /// Insertion order, oldest at the front.
    order: VecDeque<String>,
}

impl Default for DedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDS, DEFAULT_KEEP_IDS)
    }
}

impl DedupStore {
    /// `keep_ids` is clamped to `max_ids`.
    pub fn new(max_ids: usize, keep_ids: usize) -> Self {
        let max_ids = max_ids.max(1);
        Self {
            inner: Mutex::new(Inner::default()),
            max_ids,
            keep_ids: keep_ids.min(max_ids),
        }
    }

    /// Return the events whose id has not been seen before and record them.
    ///
    /// The whole call runs under one lock, so a duplicate inside `events`
    /// is returned once and two concurrent callers never both win the same id.
    pub fn filter_new(&self, events: Vec<SeismicEvent>) -> Vec<SeismicEvent> {
        let mut inner = self.inner.lock().expect("dedup mutex poisoned");
        let mut fresh = Vec::new();
        for ev in events {
            if inner.seen.insert(ev.id.clone()) {
                inner.order.push_back(ev.id.clone());
                fresh.push(ev);
            }
        }

        if inner.seen.len() > self.max_ids {
            // Ids recorded by this call are still being processed; never drop them.
            let floor = self.keep_ids.max(fresh.len());
            let before = inner.seen.len();
            while inner.seen.len() > floor {
                match inner.order.pop_front() {
                    Some(old) => {
                        inner.seen.remove(&old);
                    }
                    None => break,
                }
            }
            tracing::debug!(
                target: "dedup",
                evicted = before - inner.seen.len(),
                retained = inner.seen.len(),
                "dedup set trimmed"
            );
        }
        fresh
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("dedup mutex poisoned")
            .seen
            .contains(id)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().expect("dedup mutex poisoned").seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ev(id: &str) -> SeismicEvent {
        SeismicEvent {
            id: id.into(),
            magnitude: 4.0,
            place: String::new(),
            occurred_at: Utc::now(),
            longitude: 0.0,
            latitude: 0.0,
            depth_km: 0.0,
            details_url: String::new(),
        }
    }

    #[test]
    fn duplicate_inside_one_call_counts_once() {
        let d = DedupStore::default();
        let out = d.filter_new(vec![ev("a"), ev("a"), ev("b")]);
        assert_eq!(out.len(), 2);
        assert_eq!(d.size(), 2);
    }

    #[test]
    fn large_single_batch_is_not_evicted_by_itself() {
        let d = DedupStore::new(10, 5);
        let batch: Vec<_> = (0..12).map(|i| ev(&format!("id{i}"))).collect();
        let out = d.filter_new(batch);
        assert_eq!(out.len(), 12);
        assert_eq!(d.size(), 12);
        assert!(d.contains("id0"));

        // The next call trims down to keep_ids again.
        d.filter_new(vec![ev("next")]);
        assert_eq!(d.size(), 5);
        assert!(d.contains("next"));
        assert!(!d.contains("id0"));
    }

    #[test]
    fn keep_is_clamped_to_max() {
        let d = DedupStore::new(3, 10);
        for i in 0..5 {
            d.filter_new(vec![ev(&i.to_string())]);
        }
        assert_eq!(d.size(), 3);
    }
}
