//! Shared fixtures for the lifecycle tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::StatusCode;
use pwa_sw::{
    relative_key, resource_key, Cache, CacheStorage, Fetcher, Manifest, MemoryCacheStorage,
    NetError, OfflineWorker, Request, Response, ServiceWorkerError, WorkerConfig, WorkerHost,
};
use url::Url;

pub const ORIGIN: &str = "https://app.test";

pub fn url(key: &str) -> Url {
    if key == "/" {
        Url::parse(&format!("{ORIGIN}/")).unwrap()
    } else {
        Url::parse(&format!("{ORIGIN}/{key}")).unwrap()
    }
}

pub fn manifest(entries: &[(&str, &str)]) -> Manifest {
    entries.iter().copied().collect()
}

pub fn config(core: &[&str]) -> WorkerConfig {
    WorkerConfig::new(Url::parse(ORIGIN).unwrap()).with_core(core.iter().copied())
}

/// Network double serving canned bodies by origin-relative key.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, (StatusCode, String)>>,
    offline: AtomicBool,
    requests: Mutex<Vec<Request>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, key: &str, body: &str) {
        self.serve_status(key, StatusCode::OK, body);
    }

    pub fn serve_status(&self, key: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(key.to_string(), (status, body.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Origin-relative keys of every request seen, sorted.
    pub fn requested_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .requests()
            .iter()
            .filter_map(|r| relative_key(ORIGIN, &r.url))
            .collect();
        keys.sort();
        keys
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.requests.lock().unwrap().push(request.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("offline".to_string()));
        }

        let routes = self.routes.lock().unwrap();
        let route = relative_key(ORIGIN, &request.url)
            .and_then(|key| routes.get(&key))
            .or_else(|| resource_key(ORIGIN, &request.url).and_then(|key| routes.get(&key)));

        Ok(match route {
            Some((status, body)) => Response::new(request.url.clone(), *status, body.clone()),
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "not found"),
        })
    }
}

/// Host double counting what the worker asked for.
#[derive(Default)]
pub struct RecordingHost {
    pub skip_waiting_calls: AtomicUsize,
    pub claims: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for RecordingHost {
    fn skip_waiting(&self) {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn claim_clients(&self) -> pwa_sw::Result<()> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Storage whose `put` fails for one partition.
pub struct FaultyStorage {
    inner: MemoryCacheStorage,
    failing: String,
}

impl FaultyStorage {
    pub fn failing_puts_to(partition: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCacheStorage::new(),
            failing: partition.to_string(),
        })
    }

    pub fn inner(&self) -> &MemoryCacheStorage {
        &self.inner
    }
}

struct FaultyCache {
    inner: Arc<dyn Cache>,
}

#[async_trait]
impl Cache for FaultyCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn match_request(&self, url: &Url) -> pwa_sw::Result<Option<Response>> {
        self.inner.match_request(url).await
    }

    async fn put(&self, _url: &Url, _response: Response) -> pwa_sw::Result<()> {
        Err(ServiceWorkerError::cache("quota exceeded"))
    }

    async fn delete(&self, url: &Url) -> pwa_sw::Result<bool> {
        self.inner.delete(url).await
    }

    async fn keys(&self) -> pwa_sw::Result<Vec<Url>> {
        self.inner.keys().await
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> pwa_sw::Result<Arc<dyn Cache>> {
        let cache = self.inner.open(name).await?;
        if name == self.failing {
            Ok(Arc::new(FaultyCache { inner: cache }))
        } else {
            Ok(cache)
        }
    }

    async fn has(&self, name: &str) -> pwa_sw::Result<bool> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> pwa_sw::Result<bool> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> pwa_sw::Result<Vec<String>> {
        self.inner.keys().await
    }
}

/// A worker wired to fresh doubles.
pub struct Harness {
    pub worker: OfflineWorker,
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<MockFetcher>,
    pub host: Arc<RecordingHost>,
}

impl Harness {
    pub fn new(config: WorkerConfig, manifest: Manifest) -> Self {
        Self::with_storage(config, manifest, Arc::new(MemoryCacheStorage::new()))
    }

    pub fn with_storage(
        config: WorkerConfig,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
    ) -> Self {
        Self::with_parts(config, manifest, storage, MockFetcher::new())
    }

    /// A new worker version sharing storage and network with an old one.
    pub fn with_parts(
        config: WorkerConfig,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<MockFetcher>,
    ) -> Self {
        let host = RecordingHost::new();
        let worker = OfflineWorker::new(
            config,
            manifest,
            Arc::clone(&storage),
            fetcher.clone(),
            host.clone(),
        )
        .unwrap();
        Self {
            worker,
            storage,
            fetcher,
            host,
        }
    }

    /// Body of the content entry for a key, if cached.
    pub async fn cached_body(&self, key: &str) -> Option<String> {
        self.cached_body_at(&url(key)).await
    }

    pub async fn cached_body_at(&self, at: &Url) -> Option<String> {
        let content = self.storage.open("flutter-app-cache").await.unwrap();
        content
            .match_request(at)
            .await
            .unwrap()
            .map(|r| r.text().unwrap())
    }

    /// Origin-relative keys in the content partition, sorted.
    pub async fn content_keys(&self) -> Vec<String> {
        let content = self.storage.open("flutter-app-cache").await.unwrap();
        let mut keys: Vec<String> = content
            .keys()
            .await
            .unwrap()
            .iter()
            .filter_map(|u| relative_key(ORIGIN, u))
            .collect();
        keys.sort();
        keys
    }

    /// The manifest recorded by the last successful activation.
    pub async fn snapshot(&self) -> Option<Manifest> {
        let partition = self.storage.open("flutter-app-manifest").await.unwrap();
        partition
            .match_request(&url("manifest"))
            .await
            .unwrap()
            .map(|r| Manifest::from_slice(&r.body).unwrap())
    }

    /// Whether each of staging, content and manifest partitions exists.
    pub async fn partitions(&self) -> [bool; 3] {
        let mut exists = [false; 3];
        for (slot, name) in exists.iter_mut().zip([
            "flutter-temp-cache",
            "flutter-app-cache",
            "flutter-app-manifest",
        ]) {
            *slot = self.storage.has(name).await.unwrap();
        }
        exists
    }

    pub async fn put_content(&self, key: &str, body: &str) {
        let content = self.storage.open("flutter-app-cache").await.unwrap();
        content
            .put(&url(key), Response::ok_with(url(key), body.to_string()))
            .await
            .unwrap();
    }
}
