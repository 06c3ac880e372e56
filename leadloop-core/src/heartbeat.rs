//! Heartbeat registry types.
//!
//! One entry per logical process name. Restarts reuse the name and
//! overwrite the prior entry; a process is alive iff its last beat is
//! younger than the liveness window.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One process's most recent check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHeartbeat {
    pub last_heartbeat: Timestamp,
    pub pid: u32,
    pub status: String,
    /// Arbitrary status payload supplied by the process.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProcessHeartbeat {
    /// Age of this heartbeat at `now`.
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }

    /// A process is alive iff its heartbeat is younger than the window.
    pub fn is_alive(&self, now: Timestamp, liveness_window: Duration) -> bool {
        self.age(now) < liveness_window
    }
}

/// The registry document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HeartbeatDocument {
    #[serde(default)]
    pub last_updated: Option<Timestamp>,
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessHeartbeat>,
}

/// A heartbeat annotated with derived liveness, for dashboards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLiveness {
    pub heartbeat: ProcessHeartbeat,
    pub is_alive: bool,
    pub age: Duration,
}

// ============================================================================
// TESTS
// ============================================================================
