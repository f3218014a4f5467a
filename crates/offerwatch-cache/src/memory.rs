use std::collections::HashMap;
use std::sync::Arc;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use offerwatch_models::{ClassKey, ItemDescription};

/// In-memory hot tier backed by moka.
///
/// Bounded by entry count with least-recently-used eviction. Eviction is
/// applied lazily; [`MemoryCache::run_pending_tasks`] forces it.
pub struct MemoryCache {
    inner: Cache<ClassKey, Arc<ItemDescription>>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    pub async fn get(&self, key: &ClassKey) -> Option<Arc<ItemDescription>> {
        self.inner.get(key).await
    }

    pub async fn get_many(&self, keys: &[ClassKey]) -> HashMap<ClassKey, Arc<ItemDescription>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.inner.get(key).await {
                found.insert(key.clone(), value);
            }
        }
        found
    }

    pub async fn insert(&self, key: ClassKey, value: Arc<ItemDescription>) {
        self.inner.insert(key, value).await;
    }

    pub fn contains(&self, key: &ClassKey) -> bool {
        self.inner.contains_key(key)
    }

    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description(classid: &str) -> Arc<ItemDescription> {
        Arc::new(
            ItemDescription::from_value(serde_json::json!({
                "appid": 440, "classid": classid, "instanceid": "0", "name": format!("item {classid}")
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = MemoryCache::new(10);
        let key = ClassKey::new(440, "1", None);
        cache.insert(key.clone(), description("1")).await;

        let found = cache.get(&key).await.unwrap();
        assert_eq!(found.name.as_deref(), Some("item 1"));
        assert!(cache.contains(&key));
    }

    #[tokio::test]
    async fn get_missing() {
        let cache = MemoryCache::new(10);
        assert!(cache.get(&ClassKey::new(440, "1", None)).await.is_none());
    }

    #[tokio::test]
    async fn get_many_returns_hits_only() {
        let cache = MemoryCache::new(10);
        let a = ClassKey::new(440, "1", None);
        let b = ClassKey::new(440, "2", None);
        cache.insert(a.clone(), description("1")).await;

        let found = cache.get_many(&[a.clone(), b]).await;
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&a));
    }
}
