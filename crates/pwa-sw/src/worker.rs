//! Lifecycle dispatch.
//!
//! The host owns the event loop. It calls into a [`LifecycleHandler`] for
//! each install, activate, fetch and message event, and exposes its own
//! capabilities to the worker through [`WorkerHost`].

use std::sync::Arc;

use async_trait::async_trait;
use pwa_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::intercept::RequestInterceptor;
use crate::manager::{ActivationReport, CacheManager};
use crate::manifest::Manifest;
use crate::message::Command;

/// Handlers for the events a host delivers to a worker.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Install event. An error fails the install.
    async fn on_install(&self) -> Result<()>;

    /// Activate event.
    async fn on_activate(&self) -> Result<ActivationReport>;

    /// Fetch event. `Ok(None)` leaves the request to the host.
    async fn on_fetch(&self, request: &Request) -> Result<Option<Response>>;

    /// Message event.
    async fn on_message(&self, data: &str) -> Result<()>;
}

/// What a worker may ask of its host.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Activate this worker as soon as it is installed.
    fn skip_waiting(&self);

    /// Take control of every open client page.
    async fn claim_clients(&self) -> Result<()>;
}

/// The offline shell worker.
pub struct OfflineWorker {
    manager: CacheManager,
    interceptor: RequestInterceptor,
    host: Arc<dyn WorkerHost>,
}

impl OfflineWorker {
    /// Create a worker for one build of the application.
    pub fn new(
        config: WorkerConfig,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        host: Arc<dyn WorkerHost>,
    ) -> Result<Self> {
        config.validate()?;
        for key in config.core.iter().filter(|k| !manifest.contains_key(k)) {
            warn!(key = %key, "Shell resource is not in the manifest");
        }

        let config = Arc::new(config);
        let manifest = Arc::new(manifest);

        let interceptor = RequestInterceptor::new(
            config.origin_str(),
            config.caches.content.clone(),
            Arc::clone(&manifest),
            Arc::clone(&storage),
            Arc::clone(&fetcher),
        );
        let manager = CacheManager::new(config, manifest, storage, fetcher);

        Ok(Self {
            manager,
            interceptor,
            host,
        })
    }

    /// The cache manager behind this worker.
    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }
}

#[async_trait]
impl LifecycleHandler for OfflineWorker {
    async fn on_install(&self) -> Result<()> {
        self.host.skip_waiting();
        self.manager.install().await?;
        Ok(())
    }

    async fn on_activate(&self) -> Result<ActivationReport> {
        let report = self.manager.activate().await;
        if !report.is_reset() {
            self.host.claim_clients().await?;
        }
        Ok(report)
    }

    async fn on_fetch(&self, request: &Request) -> Result<Option<Response>> {
        self.interceptor.handle(request).await
    }

    async fn on_message(&self, data: &str) -> Result<()> {
        match Command::parse(data) {
            Some(Command::SkipWaiting) => {
                self.host.skip_waiting();
                Ok(())
            }
            Some(Command::DownloadOffline) => {
                let stored = self.manager.download_offline().await?;
                info!(stored, "Offline download complete");
                Ok(())
            }
            None => {
                debug!(data, "Ignoring unrecognized message");
                Ok(())
            }
        }
    }
}
