//! TTL-keyed file cache for expensive API/LLM responses.
//!
//! One file per `(namespace, normalized key)` under
//! `<data_dir>/cache/<namespace>/<key>.json`. The payload type is owned by
//! the caller; the cache stores an envelope with the write timestamp and
//! checks expiry lazily at read time. No background sweeper.
//!
//! The cache is an optimization, never the source of truth: `get` cannot
//! fail (corrupt or expired records are reclaimed and reported as a miss)
//! and a failed `set` is the caller's to log and shrug off.

use crate::fsio::{self, ReadOutcome};
use chrono::Utc;
use leadloop_core::{CoordinationConfig, StoreError, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk envelope around a cached payload.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope<T> {
    written_at: Timestamp,
    payload: T,
}

/// A cache hit, annotated with metadata for observability. The payload
/// itself is returned exactly as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<T> {
    pub value: T,
    /// Age of the entry at read time.
    pub age: Duration,
    pub namespace: String,
    pub key: String,
}

/// Outcome of a cache read. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(CacheHit<T>),
    Miss,
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    /// Extract the payload, discarding hit metadata.
    pub fn into_value(self) -> Option<T> {
        match self {
            CacheLookup::Hit(hit) => Some(hit.value),
            CacheLookup::Miss => None,
        }
    }
}

/// File-backed TTL cache.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
    default_ttl: Duration,
}

impl FileCache {
    /// Open the cache under the shared data directory.
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            root: config.data_dir.join("cache"),
            default_ttl: config.default_cache_ttl,
        }
    }

    /// Open a cache with an explicit root and TTL (tests, tools).
    pub fn with_root(root: impl Into<PathBuf>, default_ttl: Duration) -> Self {
        Self {
            root: root.into(),
            default_ttl,
        }
    }

    /// Look up `key` in `namespace` under the default TTL.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> CacheLookup<T> {
        self.get_with_ttl(namespace, key, self.default_ttl)
    }

    /// Look up `key` in `namespace`, treating entries older than `ttl` as
    /// misses and reclaiming them.
    pub fn get_with_ttl<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
    ) -> CacheLookup<T> {
        let path = self.entry_path(namespace, key);
        let envelope: CacheEnvelope<T> = match fsio::read_json(&path) {
            ReadOutcome::Found(envelope) => envelope,
            ReadOutcome::Absent => return CacheLookup::Miss,
            ReadOutcome::Corrupt => {
                fsio::discard_corrupt(&path, "cache");
                return CacheLookup::Miss;
            }
        };

        let age = (Utc::now() - envelope.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age >= ttl {
            tracing::debug!(namespace, key, age_secs = age.as_secs(), "Cache entry expired");
            let _ = fsio::remove_if_exists(&path);
            return CacheLookup::Miss;
        }

        CacheLookup::Hit(CacheHit {
            value: envelope.payload,
            age,
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }

    /// Store `payload` under `(namespace, key)`.
    ///
    /// Failures are reported but callers should treat them as degraded
    /// operation, not as a reason to abort their workflow.
    pub fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        payload: &T,
    ) -> Result<(), StoreError> {
        let envelope = CacheEnvelope {
            written_at: Utc::now(),
            payload,
        };
        fsio::atomic_write_json(&self.entry_path(namespace, key), &envelope)
    }

    /// Drop one namespace, or the whole cache when `namespace` is `None`.
    pub fn clear(&self, namespace: Option<&str>) -> Result<(), StoreError> {
        let target = match namespace {
            Some(ns) => self.root.join(fsio::safe_file_stem(ns)),
            None => self.root.clone(),
        };
        match std::fs::remove_dir_all(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(target, e)),
        }
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(fsio::safe_file_stem(namespace))
            .join(format!("{}.json", fsio::safe_file_stem(key)))
    }

    /// Cache root, for the inspection CLI.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ============================================================================
// TESTS
// ============================================================================
