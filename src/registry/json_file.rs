// src/registry/json_file.rs
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{Destination, DestinationStore, RegistryError};

/// Destinations persisted as one pretty-printed JSON object keyed by
/// community id. A missing file is an empty registry.
pub struct JsonFileStore {
    path: PathBuf,
    // Read-modify-write must not interleave.
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<BTreeMap<String, Destination>, RegistryError> {
        match fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, Destination>) -> Result<(), RegistryError> {
        let body = serde_json::to_vec_pretty(map)?;
        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DestinationStore for JsonFileStore {
    async fn connect(&self) -> Result<(), RegistryError> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        // Surface a corrupt file at connect time instead of on first tick.
        self.read_map().await.map(|_| ())
    }

    async fn load_all(&self) -> Result<Vec<Destination>, RegistryError> {
        Ok(self.read_map().await?.into_values().collect())
    }

    async fn upsert(&self, dest: &Destination) -> Result<(), RegistryError> {
        let _g = self.lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(dest.community_id.clone(), dest.clone());
        self.write_map(&map).await
    }

    async fn remove(&self, community_id: &str) -> Result<bool, RegistryError> {
        let _g = self.lock.lock().await;
        let mut map = self.read_map().await?;
        let removed = map.remove(community_id).is_some();
        if removed {
            self.write_map(&map).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FocusRegion;
    use chrono::Utc;

    fn dest(id: &str) -> Destination {
        Destination {
            community_id: id.into(),
            channel_id: format!("chan-{id}"),
            channel_name: "earthquake-alerts".into(),
            community_name: "Test Guild".into(),
            focus_region: FocusRegion::Extended,
            min_magnitude: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_remove_roundtrip_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("state/destinations.json"));
        store.connect().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        store.upsert(&dest("g1")).await.unwrap();
        store.upsert(&dest("g2")).await.unwrap();
        let mut again = dest("g1");
        again.focus_region = FocusRegion::Primary;
        store.upsert(&again).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        let g1 = all.iter().find(|d| d.community_id == "g1").unwrap();
        assert_eq!(g1.focus_region, FocusRegion::Primary);

        assert!(store.remove("g2").await.unwrap());
        assert!(!store.remove("g2").await.unwrap());
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_fails_connect() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("destinations.json");
        std::fs::write(&p, "{not json").unwrap();
        let store = JsonFileStore::new(&p);
        assert!(matches!(store.connect().await, Err(RegistryError::Encoding(_))));
    }
}
