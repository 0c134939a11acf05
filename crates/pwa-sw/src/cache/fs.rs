//! Directory-backed cache storage.
//!
//! Layout:
//!
//! ```text
//! <root>/<url-encoded partition name>/<sha256(url)>.json          metadata
//! <root>/<url-encoded partition name>/<sha256(url)>.<nonce>.body  response body
//! ```
//!
//! Every put writes its body under a fresh nonce, then publishes metadata
//! naming that body with an atomic rename. Concurrent writers to one URL
//! never share a file, and the live metadata always names a body written in
//! full. The body it replaced is removed afterwards; a reader that loses
//! that race sees a miss.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use pwa_net::Response;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;
use url::Url;

use super::{entry_key, Cache, CacheStorage};
use crate::error::{Result, ServiceWorkerError};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    request_url: String,
    response_url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body_file: String,
}

impl StoredEntry {
    fn from_response(key: String, body_file: String, response: &Response) -> Self {
        Self {
            request_url: key,
            body_file,
            response_url: response.url.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        }
    }

    fn into_response(self, body: Bytes) -> Result<Response> {
        let url = Url::parse(&self.response_url)
            .map_err(|e| ServiceWorkerError::cache(format!("{}: {e}", self.response_url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::cache(format!("status {}: {e}", self.status)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ServiceWorkerError::cache(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ServiceWorkerError::cache(format!("header {name}: {e}")))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}

fn missing_as_none<T>(result: std::io::Result<T>) -> std::io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// A cache partition stored in one directory.
#[derive(Debug)]
pub struct FsCache {
    name: String,
    dir: PathBuf,
}

impl FsCache {
    fn stem(url: &Url) -> String {
        hex::encode(Sha256::digest(entry_key(url).as_bytes()))
    }

    fn meta_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.json"))
    }

    fn body_path(&self, meta: &StoredEntry) -> Result<PathBuf> {
        let file = Path::new(&meta.body_file);
        match file.file_name() {
            Some(name) if name == file.as_os_str() => Ok(self.dir.join(file)),
            _ => Err(ServiceWorkerError::cache(format!(
                "body file {} escapes partition {}",
                meta.body_file, self.name
            ))),
        }
    }

    async fn remove_body(&self, meta: &StoredEntry) -> Result<()> {
        missing_as_none(tokio::fs::remove_file(self.body_path(meta)?).await)?;
        Ok(())
    }

    async fn publish(
        &self,
        stem: &str,
        nonce: &str,
        meta: &StoredEntry,
        body: &Bytes,
    ) -> Result<()> {
        tokio::fs::write(self.body_path(meta)?, body).await?;
        let tmp = self.dir.join(format!("{stem}.{nonce}.json.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec(meta)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.meta_path(stem)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_meta(path: &Path) -> Result<Option<StoredEntry>> {
        match missing_as_none(tokio::fs::read(path).await)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Cache for FsCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, url: &Url) -> Result<Option<Response>> {
        let stem = Self::stem(url);
        let Some(meta) = Self::read_meta(&self.meta_path(&stem)).await? else {
            return Ok(None);
        };
        let Some(body) = missing_as_none(tokio::fs::read(self.body_path(&meta)?).await)? else {
            return Ok(None);
        };
        meta.into_response(Bytes::from(body)).map(Some)
    }

    async fn put(&self, url: &Url, response: Response) -> Result<()> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Err(ServiceWorkerError::cache(format!(
                "partition {} no longer exists",
                self.name
            )));
        }

        let stem = Self::stem(url);
        let nonce = format!("{:016x}", rand::random::<u64>());
        let meta = StoredEntry::from_response(
            entry_key(url),
            format!("{stem}.{nonce}.body"),
            &response,
        );

        let previous = Self::read_meta(&self.meta_path(&stem)).await.ok().flatten();
        if let Err(e) = self.publish(&stem, &nonce, &meta, &response.body).await {
            let _ = self.remove_body(&meta).await;
            return Err(e);
        }
        if let Some(previous) = previous.filter(|p| p.body_file != meta.body_file) {
            self.remove_body(&previous).await?;
        }

        trace!(cache = %self.name, url = %url, "Stored entry");
        Ok(())
    }

    async fn delete(&self, url: &Url) -> Result<bool> {
        let path = self.meta_path(&Self::stem(url));
        let meta = Self::read_meta(&path).await?;
        let existed = missing_as_none(tokio::fs::remove_file(&path).await)?;
        if let Some(meta) = meta {
            self.remove_body(&meta).await?;
        }
        Ok(existed.is_some())
    }

    async fn keys(&self) -> Result<Vec<Url>> {
        let Some(mut dir) = missing_as_none(tokio::fs::read_dir(&self.dir).await)? else {
            return Ok(Vec::new());
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(meta) = Self::read_meta(&path).await? {
                let url = Url::parse(&meta.request_url).map_err(|e| {
                    ServiceWorkerError::cache(format!("{}: {e}", meta.request_url))
                })?;
                keys.push(url);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Cache storage rooted at a directory, one subdirectory per partition.
#[derive(Debug, Clone)]
pub struct FsCacheStorage {
    root: PathBuf,
}

impl FsCacheStorage {
    /// Use `root` as the storage directory. Nothing is created until a
    /// partition is opened.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, name: &str) -> PathBuf {
        self.root.join(&*urlencoding::encode(name))
    }
}

#[async_trait]
impl CacheStorage for FsCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let dir = self.partition_dir(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Arc::new(FsCache {
            name: name.to_string(),
            dir,
        }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.partition_dir(name)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = missing_as_none(tokio::fs::remove_dir_all(self.partition_dir(name)).await)?;
        Ok(removed.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let Some(mut dir) = missing_as_none(tokio::fs::read_dir(&self.root).await)? else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let raw = entry.file_name();
            let raw = raw.to_string_lossy();
            let name = urlencoding::decode(&raw)
                .map_err(|e| ServiceWorkerError::cache(format!("{raw}: {e}")))?;
            names.push(name.into_owned());
        }
        names.sort();
        Ok(names)
    }
}
