//! In-memory cache storage.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use pwa_net::Response;
use tokio::sync::RwLock;
use url::Url;

use super::{entry_key, Cache, CacheStorage};
use crate::error::{Result, ServiceWorkerError};

/// A cache partition held in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, Response>>,
}

impl MemoryCache {
    /// Create an empty partition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the partition is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, url: &Url) -> Result<Option<Response>> {
        Ok(self.entries.read().await.get(&entry_key(url)).cloned())
    }

    async fn put(&self, url: &Url, response: Response) -> Result<()> {
        self.entries.write().await.insert(entry_key(url), response);
        Ok(())
    }

    async fn delete(&self, url: &Url) -> Result<bool> {
        Ok(self.entries.write().await.remove(&entry_key(url)).is_some())
    }

    async fn keys(&self) -> Result<Vec<Url>> {
        let entries = self.entries.read().await;
        let mut keys = entries
            .keys()
            .map(|k| Url::parse(k).map_err(|e| ServiceWorkerError::cache(format!("{k}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        keys.sort();
        Ok(keys)
    }
}

/// Cache storage (the `caches` global) held in memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle to a partition, if it exists.
    pub async fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.read().await.get(name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let mut caches = self.caches.write().await;
        let cache: Arc<dyn Cache> = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)))
            .clone();
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
