//! Worker configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// Names of the three cache partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNames {
    /// Shell resources fetched during install, merged on activate.
    pub staging: String,

    /// Durable cache serving runtime fetches.
    pub content: String,

    /// Holds the single manifest snapshot record.
    pub manifest: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            staging: "flutter-temp-cache".to_string(),
            content: "flutter-app-cache".to_string(),
            manifest: "flutter-app-manifest".to_string(),
        }
    }
}

impl CacheNames {
    /// All partition names, staging first.
    pub fn all(&self) -> [&str; 3] {
        [&self.staging, &self.content, &self.manifest]
    }
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Service origin; every manifest key resolves against it
    pub origin: Url,

    /// Cache partition names
    #[serde(default)]
    pub caches: CacheNames,

    /// Key of the manifest snapshot record
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,

    /// Shell resources staged during install
    #[serde(default = "default_core")]
    pub core: Vec<String>,
}

fn default_manifest_key() -> String {
    "manifest".to_string()
}

fn default_core() -> Vec<String> {
    [
        "main.dart.js",
        "index.html",
        "flutter_bootstrap.js",
        "assets/AssetManifest.bin.json",
        "assets/FontManifest.json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl WorkerConfig {
    /// Configuration with default cache names and shell for `origin`.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            caches: CacheNames::default(),
            manifest_key: default_manifest_key(),
            core: default_core(),
        }
    }

    /// Replace the shell resource list.
    pub fn with_core<I, S>(mut self, core: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.core = core.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the partition names.
    pub fn with_caches(mut self, caches: CacheNames) -> Self {
        self.caches = caches;
        self
    }

    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host().is_none() {
            return Err(ServiceWorkerError::config(format!(
                "origin must be an http(s) URL with a host, got {}",
                self.origin
            )));
        }

        let names = self.caches.all();
        if names.iter().any(|n| n.is_empty()) {
            return Err(ServiceWorkerError::config("cache names must not be empty"));
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(ServiceWorkerError::config("cache names must be distinct"));
        }

        if self.manifest_key.is_empty() {
            return Err(ServiceWorkerError::config("manifest key must not be empty"));
        }

        Ok(())
    }

    /// The ASCII serialization of the origin, without a trailing slash.
    pub fn origin_str(&self) -> String {
        self.origin.origin().ascii_serialization()
    }

    /// Absolute URL of a manifest key. `/` is the origin root.
    pub fn resource_url(&self, key: &str) -> Result<Url> {
        let origin = self.origin_str();
        let raw = if key == "/" {
            format!("{}/", origin)
        } else {
            format!("{}/{}", origin, key)
        };
        Url::parse(&raw).map_err(|e| ServiceWorkerError::config(format!("{raw}: {e}")))
    }

    /// URL the manifest snapshot is stored under.
    pub fn manifest_url(&self) -> Result<Url> {
        self.resource_url(&self.manifest_key)
    }
}
