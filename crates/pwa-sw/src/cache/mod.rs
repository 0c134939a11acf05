//! Cache API seam.
//!
//! The worker never owns its storage. The host hands it a [`CacheStorage`]
//! (the `caches` global), from which named [`Cache`] partitions are opened.
//!
//! ```text
//! CacheStorage
//!     ├── staging   (shell resources fetched during install)
//!     ├── content   (runtime cache)
//!     └── manifest  (single snapshot record)
//!             └── URL → Response
//! ```
//!
//! A handle opened before its partition was deleted is orphaned: it no longer
//! reaches what `open` returns afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use pwa_net::Response;
use url::Url;

use crate::error::Result;

pub mod fs;
pub mod memory;

pub use fs::FsCacheStorage;
pub use memory::{MemoryCache, MemoryCacheStorage};

/// A named request → response store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Partition name.
    fn name(&self) -> &str;

    /// Look up the response stored for a URL.
    async fn match_request(&self, url: &Url) -> Result<Option<Response>>;

    /// Store a response, replacing any previous one for the URL.
    async fn put(&self, url: &Url, response: Response) -> Result<()>;

    /// Remove the entry for a URL. Returns whether one existed.
    async fn delete(&self, url: &Url) -> Result<bool>;

    /// URLs of every stored entry.
    async fn keys(&self) -> Result<Vec<Url>>;
}

/// The set of named partitions for one origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a partition, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Check whether a partition exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a partition and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Names of all existing partitions.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Entries are matched on the URL without its fragment.
pub(crate) fn entry_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}
