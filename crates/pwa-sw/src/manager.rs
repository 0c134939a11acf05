//! Cache population and invalidation.
//!
//! Install stages the application shell. Activate merges the staged shell
//! into the content partition, evicting every cached resource whose hash
//! changed (or that left the manifest) since the previous activation.
//! Unchanged resources stay cached across upgrades.

use std::sync::Arc;

use futures::future::try_join_all;
use hashbrown::HashSet;
use http::HeaderValue;
use pwa_net::{CacheMode, Fetcher, Request, Response};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{Cache, CacheStorage};
use crate::config::WorkerConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::intercept::relative_key;
use crate::manifest::Manifest;

/// Outcome of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationReport {
    /// No previous manifest; content was rebuilt from the staged shell.
    Fresh { promoted: usize },
    /// Previous manifest found; unchanged entries were kept.
    Upgraded {
        retained: usize,
        evicted: usize,
        promoted: usize,
    },
    /// Activation failed and every partition was deleted.
    Reset { reason: String },
}

impl ActivationReport {
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Reset { .. })
    }
}

/// Orchestrates the staging, content and manifest partitions.
pub struct CacheManager {
    config: Arc<WorkerConfig>,
    manifest: Arc<Manifest>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheManager {
    pub fn new(
        config: Arc<WorkerConfig>,
        manifest: Arc<Manifest>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            manifest,
            storage,
            fetcher,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Stage the shell resources, bypassing HTTP caches.
    ///
    /// Either every shell resource is stored or none is.
    pub async fn install(&self) -> Result<usize> {
        let urls = self
            .config
            .core
            .iter()
            .map(|key| self.config.resource_url(key))
            .collect::<Result<Vec<_>>>()?;

        let staging = self.storage.open(&self.config.caches.staging).await?;
        let staged = self.add_all(staging.as_ref(), urls, CacheMode::Reload).await?;

        info!(staged, cache = %self.config.caches.staging, "Staged shell resources");
        Ok(staged)
    }

    /// Activate, resetting every partition if anything goes wrong.
    pub async fn activate(&self) -> ActivationReport {
        match self.try_activate().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Failed to upgrade service worker, clearing caches");
                if let Err(reset_error) = self.reset().await {
                    error!(error = %reset_error, "Cache reset incomplete");
                }
                ActivationReport::Reset {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Merge the staged shell into content and persist the new manifest.
    ///
    /// On error the partitions may be half-updated; callers are expected to
    /// [`reset`](Self::reset).
    pub async fn try_activate(&self) -> Result<ActivationReport> {
        let names = &self.config.caches;
        let content = self.storage.open(&names.content).await?;
        let staging = self.storage.open(&names.staging).await?;
        let snapshot = self.storage.open(&names.manifest).await?;

        let report = match self.read_snapshot(snapshot.as_ref()).await? {
            None => {
                debug!("No previous manifest, rebuilding content cache");
                drop(content);
                self.storage.delete(&names.content).await?;
                let content = self.storage.open(&names.content).await?;
                let promoted = promote(staging.as_ref(), content.as_ref()).await?;
                ActivationReport::Fresh { promoted }
            }
            Some(previous) => {
                let (retained, evicted) = self.evict_stale(content.as_ref(), &previous).await?;
                let promoted = promote(staging.as_ref(), content.as_ref()).await?;
                ActivationReport::Upgraded {
                    retained,
                    evicted,
                    promoted,
                }
            }
        };

        self.storage.delete(&names.staging).await?;
        self.write_snapshot(snapshot.as_ref()).await?;

        info!(?report, "Activated");
        Ok(report)
    }

    /// Delete all three partitions.
    ///
    /// Every deletion is attempted; the first failure is returned.
    pub async fn reset(&self) -> Result<()> {
        let mut first_error = None;
        for name in self.config.caches.all() {
            match self.storage.delete(name).await {
                Ok(existed) => debug!(cache = name, existed, "Deleted cache"),
                Err(e) => {
                    warn!(cache = name, error = %e, "Failed to delete cache");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fetch every manifest resource missing from the content partition.
    ///
    /// Returns the number of resources stored.
    pub async fn download_offline(&self) -> Result<usize> {
        let origin = self.config.origin_str();
        let content = self.storage.open(&self.config.caches.content).await?;

        let cached: HashSet<String> = content
            .keys()
            .await?
            .iter()
            .filter_map(|url| relative_key(&origin, url))
            .collect();

        let missing = self
            .manifest
            .keys()
            .filter(|key| !cached.contains(*key))
            .map(|key| self.config.resource_url(key))
            .collect::<Result<Vec<_>>>()?;

        if missing.is_empty() {
            debug!("Everything already cached");
            return Ok(0);
        }

        let stored = self.add_all(content.as_ref(), missing, CacheMode::Default).await?;
        info!(stored, "Downloaded resources for offline use");
        Ok(stored)
    }

    /// Evict entries whose key is gone or whose hash changed.
    async fn evict_stale(
        &self,
        content: &dyn Cache,
        previous: &Manifest,
    ) -> Result<(usize, usize)> {
        let origin = self.config.origin_str();
        let (mut retained, mut evicted) = (0, 0);

        for url in content.keys().await? {
            let keep = relative_key(&origin, &url)
                .is_some_and(|key| self.manifest.is_unchanged_since(previous, &key));
            if keep {
                retained += 1;
            } else {
                content.delete(&url).await?;
                debug!(url = %url, "Evicted stale entry");
                evicted += 1;
            }
        }

        Ok((retained, evicted))
    }

    async fn read_snapshot(&self, snapshot: &dyn Cache) -> Result<Option<Manifest>> {
        let url = self.config.manifest_url()?;
        match snapshot.match_request(&url).await? {
            Some(response) => Manifest::from_slice(&response.body).map(Some),
            None => Ok(None),
        }
    }

    async fn write_snapshot(&self, snapshot: &dyn Cache) -> Result<()> {
        let url = self.config.manifest_url()?;
        let record = Response::ok_with(url.clone(), self.manifest.to_json()?).with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        snapshot.put(&url, record).await
    }

    /// Fetch all URLs, then store them. Nothing is stored unless every
    /// fetch returned a 2xx response.
    async fn add_all(&self, cache: &dyn Cache, urls: Vec<Url>, mode: CacheMode) -> Result<usize> {
        let requests: Vec<Request> = urls
            .into_iter()
            .map(|url| Request::get(url).cache_mode(mode))
            .collect();

        let responses = try_join_all(requests.iter().map(|request| self.fetch_ok(request))).await?;

        for (request, response) in requests.iter().zip(responses) {
            cache.put(&request.url, response).await?;
        }
        Ok(requests.len())
    }

    async fn fetch_ok(&self, request: &Request) -> Result<Response> {
        let response = self.fetcher.fetch(request).await?;
        response.error_for_status().map_err(ServiceWorkerError::from)
    }
}

/// Copy every staged entry into content, overwriting.
async fn promote(staging: &dyn Cache, content: &dyn Cache) -> Result<usize> {
    let mut promoted = 0;
    for url in staging.keys().await? {
        if let Some(response) = staging.match_request(&url).await? {
            content.put(&url, response).await?;
            promoted += 1;
        }
    }
    Ok(promoted)
}
