//! Fetch interception.
//!
//! Only GET requests for resources listed in the manifest are answered by
//! the worker. The document (`/`) is fetched online-first so a deployed
//! update is picked up as soon as the network allows; every other resource
//! is served cache-first and populated lazily.

use std::borrow::Cow;
use std::sync::Arc;

use pwa_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{Cache, CacheStorage};
use crate::error::Result;
use crate::manifest::{Manifest, ROOT_KEY};

/// Cache-busting marker appended by the application loader.
const VERSION_QUERY: &str = "?v=";

/// Manifest keys are plain paths; URLs carry them percent-encoded.
fn decoded(key: &str) -> String {
    if key.is_empty() {
        return ROOT_KEY.to_string();
    }
    urlencoding::decode(key)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| key.to_string())
}

/// Origin-relative key of a URL, as stored cache entries are keyed.
///
/// The origin root maps to `/`. URLs from another origin have no key.
/// The key is percent-decoded, so `assets/My%20Font.ttf` is listed in the
/// manifest as `assets/My Font.ttf`.
pub fn relative_key(origin: &str, url: &Url) -> Option<String> {
    let rest = url.as_str().strip_prefix(origin)?;
    let key = if rest.is_empty() {
        ""
    } else {
        rest.strip_prefix('/')?
    };
    Some(decoded(key))
}

/// Manifest key a fetch request is looked up under.
///
/// Like [`relative_key`], and additionally drops a `?v=` suffix and sends
/// fragment-only navigations (`origin/#...`) to `/`.
pub fn resource_key(origin: &str, url: &Url) -> Option<String> {
    let rest = url.as_str().strip_prefix(origin)?;
    if rest.is_empty() || rest.starts_with("/#") {
        return Some(ROOT_KEY.to_string());
    }

    let mut key = rest.strip_prefix('/')?;
    if let Some(idx) = key.find(VERSION_QUERY) {
        key = &key[..idx];
    }
    Some(decoded(key))
}

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Not ours; the host handles it.
    Bypass,
    /// Network, falling back to the cache.
    OnlineFirst,
    /// Cache, falling back to the network.
    CacheFirst,
}

impl FetchStrategy {
    /// Pick the strategy for a request.
    pub fn for_request(manifest: &Manifest, origin: &str, request: &Request) -> Self {
        if !request.is_get() {
            return Self::Bypass;
        }
        match resource_key(origin, &request.url) {
            Some(key) if manifest.contains_key(&key) => {
                if key == ROOT_KEY {
                    Self::OnlineFirst
                } else {
                    Self::CacheFirst
                }
            }
            _ => Self::Bypass,
        }
    }
}

/// Answers fetch events from the content partition.
pub struct RequestInterceptor {
    origin: String,
    content: String,
    manifest: Arc<Manifest>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl RequestInterceptor {
    pub fn new(
        origin: String,
        content: String,
        manifest: Arc<Manifest>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            origin,
            content,
            manifest,
            storage,
            fetcher,
        }
    }

    /// Handle a fetch. `Ok(None)` means the request was not intercepted.
    pub async fn handle(&self, request: &Request) -> Result<Option<Response>> {
        let strategy = FetchStrategy::for_request(&self.manifest, &self.origin, request);
        trace!(url = %request.url, ?strategy, "Fetch");

        match strategy {
            FetchStrategy::Bypass => Ok(None),
            FetchStrategy::OnlineFirst => self.online_first(request).await.map(Some),
            FetchStrategy::CacheFirst => self.cache_first(request).await.map(Some),
        }
    }

    async fn online_first(&self, request: &Request) -> Result<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                let cache = self.storage.open(&self.content).await?;
                self.store(cache.as_ref(), &request.url, &response).await;
                Ok(response)
            }
            Err(network_error) => {
                debug!(url = %request.url, error = %network_error, "Network failed, trying cache");
                match self.cached(&request.url).await {
                    Some(response) => Ok(response),
                    None => Err(network_error.into()),
                }
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        let cache = self.storage.open(&self.content).await?;
        if let Some(response) = cache.match_request(&request.url).await? {
            trace!(url = %request.url, "Cache hit");
            return Ok(response);
        }

        let response = self.fetcher.fetch(request).await?;
        if response.ok() {
            self.store(cache.as_ref(), &request.url, &response).await;
        }
        Ok(response)
    }

    /// Cache lookup where a storage failure counts as a miss.
    async fn cached(&self, url: &Url) -> Option<Response> {
        match self.lookup(url).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn lookup(&self, url: &Url) -> Result<Option<Response>> {
        let cache = self.storage.open(&self.content).await?;
        cache.match_request(url).await
    }

    /// Write-through that never fails the fetch it belongs to.
    async fn store(&self, cache: &dyn Cache, url: &Url, response: &Response) {
        if let Err(e) = cache.put(url, response.clone()).await {
            warn!(url = %url, error = %e, "Failed to cache response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    const ORIGIN: &str = "https://app.test";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(relative_key(ORIGIN, &url("https://app.test/")).as_deref(), Some("/"));
        assert_eq!(
            relative_key(ORIGIN, &url("https://app.test/assets/NOTICES")).as_deref(),
            Some("assets/NOTICES")
        );
        assert_eq!(
            relative_key(ORIGIN, &url("https://app.test/?v=1")).as_deref(),
            Some("?v=1")
        );
        assert_eq!(relative_key(ORIGIN, &url("https://cdn.test/main.dart.js")), None);
        assert_eq!(relative_key(ORIGIN, &url("https://app.test:8443/main.dart.js")), None);
    }

    #[test]
    fn test_keys_are_percent_decoded() {
        let font = url("https://app.test/assets/My Font.ttf");
        assert_eq!(font.as_str(), "https://app.test/assets/My%20Font.ttf");
        assert_eq!(relative_key(ORIGIN, &font).as_deref(), Some("assets/My Font.ttf"));
        assert_eq!(
            resource_key(ORIGIN, &url("https://app.test/assets/caf%C3%A9.png?v=2")).as_deref(),
            Some("assets/café.png")
        );
        assert_eq!(
            relative_key(ORIGIN, &url("https://app.test/assets/%FF.bin")).as_deref(),
            Some("assets/%FF.bin")
        );
    }

    #[test]
    fn test_version_query_maps_to_root() {
        assert_eq!(
            resource_key(ORIGIN, &url("https://app.test/?v=123")).as_deref(),
            Some("/")
        );
    }

    #[test]
    fn test_fragment_navigation_maps_to_root() {
        assert_eq!(
            resource_key(ORIGIN, &url("https://app.test/#/route")).as_deref(),
            Some("/")
        );
        assert_eq!(resource_key(ORIGIN, &url("https://app.test")).as_deref(), Some("/"));
    }

    #[test]
    fn test_version_query_is_stripped_from_assets() {
        assert_eq!(
            resource_key(ORIGIN, &url("https://app.test/main.dart.js?v=99")).as_deref(),
            Some("main.dart.js")
        );
        assert_eq!(
            resource_key(ORIGIN, &url("https://app.test/main.dart.js?x=1")).as_deref(),
            Some("main.dart.js?x=1")
        );
    }

    #[test]
    fn test_strategy() {
        let manifest: Manifest = [("/", "a"), ("index.html", "a"), ("main.dart.js", "b")]
            .into_iter()
            .collect();

        let get = |s: &str| Request::get(url(s));
        assert_eq!(
            FetchStrategy::for_request(&manifest, ORIGIN, &get("https://app.test/")),
            FetchStrategy::OnlineFirst
        );
        assert_eq!(
            FetchStrategy::for_request(&manifest, ORIGIN, &get("https://app.test/main.dart.js")),
            FetchStrategy::CacheFirst
        );
        assert_eq!(
            FetchStrategy::for_request(&manifest, ORIGIN, &get("https://app.test/api/users")),
            FetchStrategy::Bypass
        );

        let post = Request::new(Method::POST, url("https://app.test/main.dart.js"));
        assert_eq!(
            FetchStrategy::for_request(&manifest, ORIGIN, &post),
            FetchStrategy::Bypass
        );
    }
}
