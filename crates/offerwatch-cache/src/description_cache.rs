use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use offerwatch_models::cache_schema::key_patterns;
use offerwatch_models::{CacheSettings, ClassKey, ItemDescription};
use tokio::task::JoinHandle;

use crate::codec::Persistence;
use crate::error::CacheError;
use crate::memory::MemoryCache;

/// Descriptions by class, as handed back from one lookup.
pub type DescriptionMap = HashMap<ClassKey, Arc<ItemDescription>>;

/// Item description cache: moka (hot, bounded LRU) → durable storage → miss.
///
/// Descriptions never change once published, so each key is written at most
/// once. A hit in durable storage is promoted to the hot tier. One instance
/// may be shared by several managers through an `Arc`.
pub struct DescriptionCache {
    memory: MemoryCache,
    persistence: Option<Persistence>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DescriptionCache {
    pub fn new(max_items: u64) -> Self {
        Self {
            memory: MemoryCache::new(max_items),
            persistence: None,
            sweeper: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_items)
    }

    /// Enable write-through to durable storage.
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Hot lookup, falling back to durable storage. Storage failures are
    /// logged and reported as a miss.
    pub async fn get(&self, key: &ClassKey) -> Option<Arc<ItemDescription>> {
        if let Some(hit) = self.memory.get(key).await {
            return Some(hit);
        }
        let persistence = self.persistence.as_ref()?;
        match persistence.load_json::<ItemDescription>(&key_patterns::asset(key)) {
            Ok(Some(description)) => {
                let description = Arc::new(description);
                self.memory.insert(key.clone(), description.clone()).await;
                Some(description)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Persisted description read failed");
                None
            }
        }
    }

    /// Hot-tier lookup of many keys; missing keys are absent from the result.
    pub async fn get_many(&self, keys: &[ClassKey]) -> DescriptionMap {
        self.memory.get_many(keys).await
    }

    /// Whether `key` is in the hot tier.
    pub fn exists(&self, key: &ClassKey) -> bool {
        self.memory.contains(key)
    }

    /// Store one description; a key already present is left untouched.
    pub async fn put(&self, key: ClassKey, description: Arc<ItemDescription>) {
        self.put_many(vec![(key, description)]).await;
    }

    /// Store a batch, persisting the new entries in one write.
    pub async fn put_many(&self, entries: Vec<(ClassKey, Arc<ItemDescription>)>) {
        let mut fresh = Vec::with_capacity(entries.len());
        for (key, description) in entries {
            if self.memory.contains(&key) {
                continue;
            }
            self.memory.insert(key.clone(), description.clone()).await;
            fresh.push((key_patterns::asset(&key), description));
        }

        if fresh.is_empty() {
            return;
        }
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save_json_many(&fresh) {
                tracing::error!(count = fresh.len(), error = %e, "Failed to persist item descriptions");
            }
        }
    }

    /// Read back from durable storage every key not in the hot tier and
    /// return the entries found. They are promoted to the hot tier too, but
    /// the caller should use the returned map: the hot tier may already have
    /// evicted them.
    pub async fn hydrate(&self, keys: &[ClassKey]) -> Result<DescriptionMap, CacheError> {
        let mut promoted = DescriptionMap::new();
        let Some(persistence) = &self.persistence else {
            return Ok(promoted);
        };
        let names: Vec<String> = keys
            .iter()
            .filter(|key| !self.memory.contains(key))
            .map(key_patterns::asset)
            .collect();
        if names.is_empty() {
            return Ok(promoted);
        }

        let loaded: HashMap<String, ItemDescription> = persistence.load_json_many(&names)?;
        for (name, description) in loaded {
            let Some(key) = key_patterns::parse_asset(&name) else {
                continue;
            };
            let description = Arc::new(description);
            self.memory.insert(key.clone(), description.clone()).await;
            promoted.insert(key, description);
        }
        tracing::debug!(
            requested = names.len(),
            promoted = promoted.len(),
            "Hydrated descriptions from storage"
        );
        Ok(promoted)
    }

    /// Apply pending eviction so the hot tier is back within capacity.
    pub async fn sweep(&self) {
        self.memory.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.memory.entry_count()
    }

    /// Spawn the periodic sweeper. It only holds a weak handle, so it ends
    /// once every holder of the cache is gone. Calling this again replaces
    /// the running sweeper.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep().await;
                tracing::debug!(entries = cache.entry_count(), "Description cache swept");
            }
        });

        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    pub fn stop_sweeper(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for DescriptionCache {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::ReverseCodec;
    use crate::storage::{SqliteStorage, Storage};

    fn description(appid: u32, classid: &str) -> Arc<ItemDescription> {
        Arc::new(
            ItemDescription::from_value(serde_json::json!({
                "appid": appid, "classid": classid, "instanceid": "0",
                "name": format!("item {classid}")
            }))
            .unwrap(),
        )
    }

    fn key(classid: &str) -> ClassKey {
        ClassKey::new(440, classid, None)
    }

    #[tokio::test]
    async fn capacity_two_keeps_most_recent() {
        let cache = DescriptionCache::new(2);
        for id in ["a", "b", "c"] {
            cache.put(key(id), description(440, id)).await;
            assert!(cache.get(&key(id)).await.is_some());
        }
        cache.sweep().await;

        assert!(cache.get(&key("b")).await.is_some());
        assert!(cache.get(&key("c")).await.is_some());
        assert!(cache.get(&key("a")).await.is_none());
        assert_eq!(cache.entry_count(), 2);
    }

    #[tokio::test]
    async fn put_is_write_once() {
        let cache = DescriptionCache::new(10);
        cache.put(key("1"), description(440, "1")).await;
        let mut other = (*description(440, "1")).clone();
        other.name = Some("renamed".to_string());
        cache.put(key("1"), Arc::new(other)).await;

        assert_eq!(cache.get(&key("1")).await.unwrap().name.as_deref(), Some("item 1"));
    }

    #[tokio::test]
    async fn put_writes_through_and_get_reads_back() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let persistence = Persistence::new(storage.clone());

        let writer = DescriptionCache::new(10).with_persistence(persistence.clone());
        writer.put(key("7"), description(440, "7")).await;
        assert!(storage.read("asset_440_7_0.json").unwrap().is_some());

        let reader = DescriptionCache::new(10).with_persistence(persistence);
        assert!(!reader.exists(&key("7")));
        let found = reader.get(&key("7")).await.unwrap();
        assert_eq!(found.name.as_deref(), Some("item 7"));
        assert!(reader.exists(&key("7")));
    }

    #[tokio::test]
    async fn hydrate_promotes_persisted_entries() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let persistence = Persistence::new(storage).with_codec(Arc::new(ReverseCodec));
        DescriptionCache::new(10)
            .with_persistence(persistence.clone())
            .put_many(vec![(key("1"), description(440, "1")), (key("2"), description(440, "2"))])
            .await;

        let cache = DescriptionCache::new(10).with_persistence(persistence);
        let promoted = cache.hydrate(&[key("1"), key("2"), key("3")]).await.unwrap();
        assert_eq!(promoted.len(), 2);
        assert_eq!(promoted[&key("2")].name.as_deref(), Some("item 2"));
        assert!(cache.exists(&key("1")));
        assert!(cache.exists(&key("2")));
        assert!(!cache.exists(&key("3")));
        assert!(cache.hydrate(&[key("1")]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hydrate_returns_entries_beyond_capacity() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let persistence = Persistence::new(storage);
        let keys: Vec<ClassKey> = (0..20).map(|i| key(&i.to_string())).collect();
        DescriptionCache::new(100)
            .with_persistence(persistence.clone())
            .put_many(keys.iter().map(|k| (k.clone(), description(440, &k.classid))).collect())
            .await;

        let cache = DescriptionCache::new(5).with_persistence(persistence);
        let promoted = cache.hydrate(&keys).await.unwrap();
        assert_eq!(promoted.len(), 20);
        cache.sweep().await;
        assert!(cache.entry_count() <= 5);
    }

    #[tokio::test]
    async fn hydrate_without_persistence_is_noop() {
        let cache = DescriptionCache::new(10);
        assert!(cache.hydrate(&[key("1")]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweeper_stops_on_request() {
        let cache = Arc::new(DescriptionCache::new(10));
        cache.start_sweeper(Duration::from_millis(10));
        assert!(cache.sweeper_running());

        cache.stop_sweeper();
        tokio::task::yield_now().await;
        assert!(!cache.sweeper_running());
    }
}
