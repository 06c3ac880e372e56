//! Error types for LEADLOOP operations
//!
//! The coordination layer never raises on degraded reads: cache misses,
//! corrupt records, absent heartbeats, and lease denials are all typed
//! return values, not errors. The enums here cover the cases that DO
//! propagate - failed writes, failed external calls, bad configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Write-side failures of the file-backed stores.
///
/// Read-side corruption is handled internally (logged, record reclaimed,
/// treated as absent) and never surfaces through this type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Attach a path to a raw IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a path to a serde_json error raised while writing.
    pub fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Serialize {
            path: path.into(),
            source,
        }
    }
}

/// Failures of outbound calls to transient-failure-prone dependencies
/// (listings API, LLM scoring, reputation lookup, exchange-rate fetch).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network/HTTP-level failure worth retrying.
    #[error("Transient failure from {dependency}: {reason}")]
    Transient { dependency: String, reason: String },

    /// Explicit 429-class signal. Never retried locally; the caller arms
    /// the shared rate-limit coordinator instead.
    #[error("Rate limited by {dependency}")]
    RateLimited { dependency: String },

    /// The dependency answered, but with something we cannot use.
    #[error("Invalid response from {dependency}: {reason}")]
    InvalidResponse { dependency: String, reason: String },
}

impl FetchError {
    /// Name of the dependency that produced this failure.
    pub fn dependency(&self) -> &str {
        match self {
            FetchError::Transient { dependency, .. }
            | FetchError::RateLimited { dependency }
            | FetchError::InvalidResponse { dependency, .. } => dependency,
        }
    }

    /// True for the 429-class signal that must short-circuit retries.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

/// Configuration errors raised at process startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all LEADLOOP errors.
#[derive(Debug, Error)]
pub enum LeadloopError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for LEADLOOP operations.
pub type LeadloopResult<T> = Result<T, LeadloopError>;

// =============================================================================
// TESTS
// =============================================================================
