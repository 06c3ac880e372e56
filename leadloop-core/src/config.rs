//! Configuration for the coordination layer.
//!
//! Every LEADLOOP process (scanner, workers, ctl) builds one
//! `CoordinationConfig` at startup and hands it to the stores it opens.
//! All windows default to the constants in [`crate::constants`] and can be
//! overridden through `LEADLOOP_*` environment variables.

use crate::constants::{
    DEFAULT_BLOCKED_LOG_INTERVAL_SECS, DEFAULT_CACHE_TTL_SECS, DEFAULT_COOLDOWN_SECS,
    DEFAULT_FAILURE_COOLDOWN_SECS, DEFAULT_HEARTBEAT_REAP_SECS, DEFAULT_LEASE_STALE_SECS,
    DEFAULT_LIVENESS_WINDOW_SECS,
};
use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// Shared configuration for the file-backed coordination stores.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Root directory under which every store keeps its files.
    pub data_dir: PathBuf,

    /// How long the rate-limit cooldown stays armed (default: 30 minutes).
    pub cooldown_duration: Duration,

    /// Minimum gap between "still blocked" log lines per context
    /// (default: 60 seconds).
    pub blocked_log_interval: Duration,

    /// Age past which an in-progress lease is reclaimable
    /// (default: 30 minutes).
    pub lease_stale_after: Duration,

    /// Rejection window after a failed lease attempt (default: 5 minutes).
    pub failure_cooldown: Duration,

    /// Maximum heartbeat age for a process to count as alive
    /// (default: 60 seconds).
    pub liveness_window: Duration,

    /// Heartbeat entries older than this are reaped (default: 24 hours).
    pub heartbeat_reap_age: Duration,

    /// Cache entry lifetime when the caller does not override it
    /// (default: 1 hour).
    pub default_cache_ttl: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("leadloop-data"),
            cooldown_duration: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            blocked_log_interval: Duration::from_secs(DEFAULT_BLOCKED_LOG_INTERVAL_SECS),
            lease_stale_after: Duration::from_secs(DEFAULT_LEASE_STALE_SECS),
            failure_cooldown: Duration::from_secs(DEFAULT_FAILURE_COOLDOWN_SECS),
            liveness_window: Duration::from_secs(DEFAULT_LIVENESS_WINDOW_SECS),
            heartbeat_reap_age: Duration::from_secs(DEFAULT_HEARTBEAT_REAP_SECS),
            default_cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl CoordinationConfig {
    /// Create a CoordinationConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEADLOOP_DATA_DIR`: root directory for all stores (default: `leadloop-data`)
    /// - `LEADLOOP_COOLDOWN_SECS`: rate-limit cooldown duration (default: 1800)
    /// - `LEADLOOP_BLOCKED_LOG_INTERVAL_SECS`: blocked-log throttle (default: 60)
    /// - `LEADLOOP_LEASE_STALE_SECS`: lease staleness threshold (default: 1800)
    /// - `LEADLOOP_FAILURE_COOLDOWN_SECS`: post-failure rejection window (default: 300)
    /// - `LEADLOOP_LIVENESS_WINDOW_SECS`: heartbeat liveness window (default: 60)
    /// - `LEADLOOP_HEARTBEAT_REAP_SECS`: heartbeat GC age (default: 86400)
    /// - `LEADLOOP_CACHE_TTL_SECS`: default cache TTL (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("LEADLOOP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cooldown_duration: env_secs("LEADLOOP_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS),
            blocked_log_interval: env_secs(
                "LEADLOOP_BLOCKED_LOG_INTERVAL_SECS",
                DEFAULT_BLOCKED_LOG_INTERVAL_SECS,
            ),
            lease_stale_after: env_secs("LEADLOOP_LEASE_STALE_SECS", DEFAULT_LEASE_STALE_SECS),
            failure_cooldown: env_secs(
                "LEADLOOP_FAILURE_COOLDOWN_SECS",
                DEFAULT_FAILURE_COOLDOWN_SECS,
            ),
            liveness_window: env_secs(
                "LEADLOOP_LIVENESS_WINDOW_SECS",
                DEFAULT_LIVENESS_WINDOW_SECS,
            ),
            heartbeat_reap_age: env_secs(
                "LEADLOOP_HEARTBEAT_REAP_SECS",
                DEFAULT_HEARTBEAT_REAP_SECS,
            ),
            default_cache_ttl: env_secs("LEADLOOP_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
        }
    }

    /// Create a configuration for development/testing with short windows.
    pub fn development(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cooldown_duration: Duration::from_secs(10),
            blocked_log_interval: Duration::from_secs(1),
            lease_stale_after: Duration::from_secs(30),
            failure_cooldown: Duration::from_secs(5),
            liveness_window: Duration::from_secs(10),
            heartbeat_reap_age: Duration::from_secs(120),
            default_cache_ttl: Duration::from_secs(15),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "data_dir".to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        for (field, value) in [
            ("cooldown_duration", self.cooldown_duration),
            ("lease_stale_after", self.lease_stale_after),
            ("failure_cooldown", self.failure_cooldown),
            ("liveness_window", self.liveness_window),
            ("heartbeat_reap_age", self.heartbeat_reap_age),
            ("default_cache_ttl", self.default_cache_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be > 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Parse a duration in whole seconds from an environment variable.
pub(crate) fn env_secs(var: &str, default_secs: u64) -> Duration {
    Duration::from_secs(
        std::env::var(var)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_secs),
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CoordinationConfig::default();
        assert_eq!(
            config.cooldown_duration,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS)
        );
        assert_eq!(
            config.lease_stale_after,
            Duration::from_secs(DEFAULT_LEASE_STALE_SECS)
        );
        assert_eq!(
            config.failure_cooldown,
            Duration::from_secs(DEFAULT_FAILURE_COOLDOWN_SECS)
        );
        assert_eq!(
            config.liveness_window,
            Duration::from_secs(DEFAULT_LIVENESS_WINDOW_SECS)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_development() {
        let config = CoordinationConfig::development("/tmp/leadloop-dev");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/leadloop-dev"));
        assert_eq!(config.cooldown_duration, Duration::from_secs(10));
        assert_eq!(config.failure_cooldown, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_empty_data_dir() {
        let config = CoordinationConfig {
            data_dir: PathBuf::new(),
            ..CoordinationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_config_rejects_zero_window() {
        let config = CoordinationConfig {
            liveness_window: Duration::ZERO,
            ..CoordinationConfig::default()
        };
        let err = config.validate().unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("liveness_window"));
    }
}
