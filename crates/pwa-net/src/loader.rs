//! HTTP fetcher backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use http::HeaderValue;
use reqwest::Client;
use tracing::{debug, trace};

use crate::{CacheMode, Fetcher, NetError, Request, Response};

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("pwa-sw/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// [`Fetcher`] that talks to the real network.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        debug!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, cache = ?request.cache, "Fetching");

        if !matches!(request.url.scheme(), "http" | "https") {
            return Err(NetError::InvalidUrl(request.url.to_string()));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if request.cache == CacheMode::Reload {
            builder = builder
                .header(http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(http::header::PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}
