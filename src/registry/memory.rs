// src/registry/memory.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Destination, DestinationStore, RegistryError};

/// In-process store. Used when no destinations file is configured, and by
/// tests to simulate outages via [`MemoryStore::set_available`].
pub struct MemoryStore {
    records: Mutex<HashMap<String, Destination>>,
    available: AtomicBool,
    /// Every applied write, in order, for inspection.
    pub writes: Mutex<Vec<String>>,
    pub connects: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = Destination>) -> Self {
        let s = Self::new();
        {
            let mut m = s.records.lock().expect("store mutex poisoned");
            for d in records {
                m.insert(d.community_id.clone(), d);
            }
        }
        s
    }

    pub fn set_available(&self, up: bool) {
        self.available.store(up, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, community_id: &str) -> Option<Destination> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .get(community_id)
            .cloned()
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("memory store offline".into()))
        }
    }
}

#[async_trait::async_trait]
impl DestinationStore for MemoryStore {
    async fn connect(&self) -> Result<(), RegistryError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn load_all(&self) -> Result<Vec<Destination>, RegistryError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .expect("store mutex poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn upsert(&self, dest: &Destination) -> Result<(), RegistryError> {
        self.check()?;
        self.records
            .lock()
            .expect("store mutex poisoned")
            .insert(dest.community_id.clone(), dest.clone());
        self.writes
            .lock()
            .expect("store mutex poisoned")
            .push(format!("upsert:{}", dest.community_id));
        Ok(())
    }

    async fn remove(&self, community_id: &str) -> Result<bool, RegistryError> {
        self.check()?;
        let removed = self
            .records
            .lock()
            .expect("store mutex poisoned")
            .remove(community_id)
            .is_some();
        self.writes
            .lock()
            .expect("store mutex poisoned")
            .push(format!("remove:{community_id}"));
        Ok(removed)
    }
}
