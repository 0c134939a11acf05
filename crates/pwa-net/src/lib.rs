//! # PWA Net
//!
//! Request/response model and network access for the offline worker.
//!
//! ## Design Goals
//!
//! 1. **Host seam**: the worker only sees the [`Fetcher`] trait, so tests and
//!    embedders can swap the network out.
//! 2. **Cheap clones**: response bodies are [`Bytes`], so a response can be
//!    stored in a cache and returned to the caller without copying.
//! 3. **Reload semantics**: [`CacheMode::Reload`] forces a full network fetch,
//!    which the install step relies on.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{HttpFetcher, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Bad status {status} for {url}")]
    BadStatus { url: Url, status: StatusCode },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// How a request interacts with intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching.
    #[default]
    Default,
    /// Bypass every intermediate cache and go to the network.
    Reload,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub cache: CacheMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            cache: CacheMode::Default,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the cache mode.
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache = mode;
        self
    }

    /// Whether this is a GET request.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response with no headers.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Create a 200 response.
    pub fn ok_with(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(url, StatusCode::OK, body)
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the response was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Convert a non-2xx response into [`NetError::BadStatus`].
    pub fn error_for_status(self) -> Result<Self, NetError> {
        if self.ok() {
            Ok(self)
        } else {
            Err(NetError::BadStatus {
                url: self.url,
                status: self.status,
            })
        }
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Content type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Something that can perform network fetches.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request from the network.
    ///
    /// An `Err` means the request never produced a response. Non-2xx
    /// responses are returned as `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}
