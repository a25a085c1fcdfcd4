//! TTL cache in front of a [`CatalogStore`].
//!
//! Part, model and fitment lookups are cached per key (trimmed and
//! uppercased, the same key the stores match on) for
//! `[catalog] cache_ttl_secs`. Misses are cached too; errors never are.
//! Part lists pass straight through.
//!
//! Each map is an LRU bounded by `[catalog] cache_capacity`. Expired
//! entries at the cold end are dropped on every insert.

use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use partselect_core::models::{ModelRecord, PartRecord};
use partselect_core::store::CatalogStore;

struct TtlMap<K: Hash + Eq, V> {
    ttl: Duration,
    entries: Mutex<LruCache<K, (V, Instant)>>,
}

impl<K: Hash + Eq, V: Clone> TtlMap<K, V> {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some((value, inserted_at)) if now.duration_since(*inserted_at) < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        while let Some((_, (_, inserted_at))) = entries.peek_lru() {
            if now.duration_since(*inserted_at) < self.ttl {
                break;
            }
            entries.pop_lru();
        }
        entries.put(key, (value, now));
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn cache_key(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

pub struct CachedCatalog {
    inner: Arc<dyn CatalogStore>,
    parts: TtlMap<String, Option<PartRecord>>,
    models: TtlMap<String, Option<ModelRecord>>,
    fitment: TtlMap<(String, String), bool>,
}

impl CachedCatalog {
    pub fn new(inner: Arc<dyn CatalogStore>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            parts: TtlMap::new(capacity, ttl),
            models: TtlMap::new(capacity, ttl),
            fitment: TtlMap::new(capacity, ttl),
        }
    }

    /// Wrap `inner` unless `ttl_secs` is zero.
    pub fn wrap(inner: Arc<dyn CatalogStore>, ttl_secs: u64, capacity: usize) -> Arc<dyn CatalogStore> {
        if ttl_secs == 0 {
            inner
        } else {
            Arc::new(Self::new(inner, Duration::from_secs(ttl_secs), capacity))
        }
    }

    /// Entries held across the part, model and fitment maps.
    pub async fn len(&self) -> usize {
        self.parts.len().await + self.models.len().await + self.fitment.len().await
    }
}

#[async_trait]
impl CatalogStore for CachedCatalog {
    async fn find_part(&self, number: &str) -> Result<Option<PartRecord>> {
        let key = cache_key(number);
        if let Some(hit) = self.parts.get(&key).await {
            return Ok(hit);
        }
        let found = self.inner.find_part(number).await?;
        self.parts.insert(key, found.clone()).await;
        Ok(found)
    }

    async fn find_model(&self, model_number: &str) -> Result<Option<ModelRecord>> {
        let key = cache_key(model_number);
        if let Some(hit) = self.models.get(&key).await {
            return Ok(hit);
        }
        let found = self.inner.find_model(model_number).await?;
        self.models.insert(key, found.clone()).await;
        Ok(found)
    }

    async fn parts_for_model(&self, model_number: &str, limit: usize) -> Result<Vec<PartRecord>> {
        self.inner.parts_for_model(model_number, limit).await
    }

    async fn parts_for_symptom(
        &self,
        model_number: &str,
        symptom_tag: &str,
        limit: usize,
    ) -> Result<Vec<PartRecord>> {
        self.inner
            .parts_for_symptom(model_number, symptom_tag, limit)
            .await
    }

    async fn has_fitment(&self, partselect_number: &str, model_number: &str) -> Result<bool> {
        let key = (cache_key(partselect_number), cache_key(model_number));
        if let Some(hit) = self.fitment.get(&key).await {
            return Ok(hit);
        }
        let found = self
            .inner
            .has_fitment(partselect_number, model_number)
            .await?;
        self.fitment.insert(key, found).await;
        Ok(found)
    }
}
