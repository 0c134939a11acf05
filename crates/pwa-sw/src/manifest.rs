//! Build manifest: resource key to content hash.
//!
//! The manifest is generated when the application is built and never changes
//! while a worker runs. A copy of it is persisted on every successful
//! activation so the next version can tell which cached resources are still
//! valid.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceWorkerError};

/// Key used for the application document.
pub const ROOT_KEY: &str = "/";

/// A single manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceEntry {
    /// Path relative to the origin, or `/`.
    pub key: String,
    /// Opaque fingerprint of the resource contents.
    pub content_hash: String,
}

impl ResourceEntry {
    pub fn new(key: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_hash: content_hash.into(),
        }
    }
}

/// Mapping of resource key to content hash.
///
/// Serializes as a flat JSON object. Keys are kept sorted so generated files
/// are stable between builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry, returning the previous hash.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Option<String> {
        self.entries.insert(key.into(), content_hash.into())
    }

    /// Content hash for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(key, hash)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries as owned rows.
    pub fn entries(&self) -> Vec<ResourceEntry> {
        self.iter().map(|(k, h)| ResourceEntry::new(k, h)).collect()
    }

    /// True when `key` exists here with the same hash it had in `previous`.
    ///
    /// A cached copy of such a resource can be reused as-is.
    pub fn is_unchanged_since(&self, previous: &Manifest, key: &str) -> bool {
        match (self.get(key), previous.get(key)) {
            (Some(current), Some(old)) => current == old,
            _ => false,
        }
    }

    /// Compare against an older manifest.
    pub fn diff(&self, previous: &Manifest) -> ManifestDiff {
        let mut diff = ManifestDiff::default();

        for (key, hash) in self.iter() {
            match previous.get(key) {
                None => diff.added.push(key.to_string()),
                Some(old) if old != hash => diff.changed.push(key.to_string()),
                Some(_) => diff.unchanged.push(key.to_string()),
            }
        }
        diff.removed = previous
            .keys()
            .filter(|k| !self.contains_key(k))
            .map(String::from)
            .collect();

        diff
    }

    /// Parse a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes())
    }

    /// Parse a manifest from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ServiceWorkerError::manifest(format!("invalid manifest JSON: {e}")))
    }

    /// Load a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Compact JSON, the form persisted in the snapshot partition.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON for files meant to be read by people.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl FromIterator<ResourceEntry> for Manifest {
    fn from_iter<I: IntoIterator<Item = ResourceEntry>>(iter: I) -> Self {
        iter.into_iter().map(|e| (e.key, e.content_hash)).collect()
    }
}

/// Key-level difference between two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ManifestDiff {
    /// Whether nothing was added, changed or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}
