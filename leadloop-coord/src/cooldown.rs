//! Shared rate-limit cooldown.
//!
//! A single file holding one absolute expiry timestamp (unix seconds).
//! Any process that sees a 429-class response arms it; every process
//! checks it before issuing a rate-limited call. One coordinator shared
//! across processes keeps the whole fleet off the API during the backoff
//! window instead of each process rediscovering the limit on its own.
//!
//! The state clears lazily: the first `is_blocked` after expiry deletes
//! the file. There is no timer.

use crate::fsio::{self, ReadOutcome};
use chrono::Utc;
use leadloop_core::{CoordinationConfig, StoreError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of the cooldown for dashboards and the inspection CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub blocked: bool,
    pub remaining: Duration,
}

/// Process-wide, file-backed circuit breaker for one rate-limited API.
#[derive(Debug)]
pub struct RateLimitCoordinator {
    path: PathBuf,
    cooldown: Duration,
    log_interval: Duration,
    /// Last "still blocked" log per caller context, to stop log storms
    /// from hot polling loops. Process-local by construction.
    last_logged: Mutex<HashMap<String, Instant>>,
}

impl RateLimitCoordinator {
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            path: config.data_dir.join("rate_limit_cooldown"),
            cooldown: config.cooldown_duration,
            log_interval: config.blocked_log_interval,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// Arm the cooldown: `armed_until = now + cooldown_duration`.
    ///
    /// The caller-supplied context lands in the audit log so the trail
    /// shows which caller tripped the limiter.
    pub fn arm(&self, context: &str) -> Result<(), StoreError> {
        let armed_until = Utc::now().timestamp() + self.cooldown.as_secs() as i64;
        fsio::atomic_write_string(&self.path, &format!("{armed_until}\n"))?;
        tracing::warn!(
            context,
            armed_until,
            cooldown_secs = self.cooldown.as_secs(),
            "Rate-limit cooldown armed"
        );
        Ok(())
    }

    /// True while the cooldown is armed. The first call after expiry
    /// clears the state and returns false.
    pub fn is_blocked(&self, context: &str) -> bool {
        let Some(armed_until) = self.armed_until() else {
            return false;
        };
        let now = Utc::now().timestamp();
        if now >= armed_until {
            tracing::info!(context, "Rate-limit cooldown expired, clearing");
            let _ = fsio::remove_if_exists(&self.path);
            return false;
        }
        if self.should_log(context) {
            tracing::warn!(
                context,
                remaining_secs = armed_until - now,
                "Rate-limit cooldown active, skipping call"
            );
        }
        true
    }

    /// Snapshot without logging or clearing.
    pub fn status(&self) -> CooldownStatus {
        match self.armed_until() {
            Some(armed_until) => {
                let remaining = armed_until - Utc::now().timestamp();
                if remaining > 0 {
                    CooldownStatus {
                        blocked: true,
                        remaining: Duration::from_secs(remaining as u64),
                    }
                } else {
                    CooldownStatus {
                        blocked: false,
                        remaining: Duration::ZERO,
                    }
                }
            }
            None => CooldownStatus {
                blocked: false,
                remaining: Duration::ZERO,
            },
        }
    }

    /// Read the expiry. Absent or unparseable means "not armed"; an
    /// unparseable file is discarded so it cannot wedge the coordinator.
    fn armed_until(&self) -> Option<i64> {
        match fsio::read_string(&self.path) {
            ReadOutcome::Found(contents) => match contents.trim().parse::<i64>() {
                Ok(ts) => Some(ts),
                Err(_) => {
                    fsio::discard_corrupt(&self.path, "cooldown");
                    None
                }
            },
            ReadOutcome::Absent => None,
            ReadOutcome::Corrupt => {
                fsio::discard_corrupt(&self.path, "cooldown");
                None
            }
        }
    }

    /// At most one "still blocked" log line per context per interval.
    fn should_log(&self, context: &str) -> bool {
        if let Ok(mut map) = self.last_logged.lock() {
            let now = Instant::now();
            match map.get(context) {
                Some(last) if now.duration_since(*last) < self.log_interval => false,
                _ => {
                    map.insert(context.to_string(), now);
                    true
                }
            }
        } else {
            true
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
