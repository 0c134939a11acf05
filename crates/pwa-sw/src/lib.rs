//! # PWA Service Worker
//!
//! Offline support for a web application shell, driven by the host's
//! service worker lifecycle.
//!
//! ## Features
//!
//! - **Manifest**: build-time map of resource key to content hash
//! - **Install**: stage the application shell, bypassing HTTP caches
//! - **Activate**: evict resources whose hash changed, keep the rest,
//!   promote the staged shell, persist the manifest
//! - **Fetch**: online-first for the document, cache-first for assets
//! - **Messages**: `skipWaiting`, `downloadOffline`
//!
//! ## Architecture
//!
//! ```text
//! Registration (host)
//!     │
//!     └── OfflineWorker: LifecycleHandler
//!             ├── CacheManager        install / activate / downloadOffline
//!             ├── RequestInterceptor  fetch
//!             └── Manifest
//!
//! CacheStorage (caches)
//!     ├── staging
//!     ├── content
//!     └── manifest
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod intercept;
pub mod manager;
pub mod manifest;
pub mod message;
pub mod registration;
pub mod worker;

pub use cache::{Cache, CacheStorage, FsCacheStorage, MemoryCache, MemoryCacheStorage};
pub use config::{CacheNames, WorkerConfig};
pub use error::{Result, ServiceWorkerError};
pub use intercept::{relative_key, resource_key, FetchStrategy, RequestInterceptor};
pub use manager::{ActivationReport, CacheManager};
pub use manifest::{Manifest, ManifestDiff, ResourceEntry, ROOT_KEY};
pub use message::Command;
pub use registration::{
    MessageTarget, Registration, RegistrationHost, RegistrationSnapshot, ServiceWorkerEvent,
    WorkerId, WorkerState,
};
pub use worker::{LifecycleHandler, OfflineWorker, WorkerHost};

pub use pwa_net::{CacheMode, Fetcher, NetError, Request, Response};
