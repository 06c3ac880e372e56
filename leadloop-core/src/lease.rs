//! Lease state machine for one-shot side-effecting actions.
//!
//! A lease is a time-bounded claim of exclusive responsibility for one
//! `(entity, action)` pair. This module holds the record layout and the
//! pure state arithmetic; the file-backed store that enforces the
//! at-most-one-grant property lives in `leadloop-coord`.
//!
//! # State Transition Diagram
//!
//! ```text
//! Free ── begin_attempt() ──→ InProgress ──┬── complete() ──→ Succeeded (terminal)
//!   ↑                                      └── fail() ──────→ Failed
//!   ├── cooldown elapses ── Failed ────────────────────────────┘
//!   └── staleness elapses ── InProgress (abandoned, reclaimed)
//! ```

use crate::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Derived state of a lease record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    /// No attempt in flight, nothing succeeded, no live cooldown.
    Free,
    /// Exactly one worker owns an in-flight attempt.
    InProgress,
    /// The action completed. Terminal: never re-entered without force.
    Succeeded,
    /// The last attempt failed; a cooldown window applies.
    Failed,
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeaseState::Free => "free",
            LeaseState::InProgress => "in_progress",
            LeaseState::Succeeded => "succeeded",
            LeaseState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// On-disk lease record for one `(entity, action)` pair.
///
/// Field names are the wire format; timestamps deserialize leniently so a
/// record with a mangled timestamp keeps its other fields instead of being
/// discarded wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LeaseRecord {
    /// The action completed successfully at some point.
    #[serde(default)]
    pub action_sent: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub action_sent_at: Option<Timestamp>,

    /// An attempt is currently in flight.
    #[serde(default)]
    pub action_in_progress: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub action_started_at: Option<Timestamp>,

    /// The most recent attempt failed.
    #[serde(default)]
    pub action_failed: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_attempt_at: Option<Timestamp>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub failure_count: u32,
}

impl LeaseRecord {
    /// Derive the lease state. Success dominates; a record can carry
    /// failure history and still be terminal.
    pub fn state(&self) -> LeaseState {
        if self.action_sent {
            LeaseState::Succeeded
        } else if self.action_in_progress {
            LeaseState::InProgress
        } else if self.action_failed {
            LeaseState::Failed
        } else {
            LeaseState::Free
        }
    }

    /// An in-progress lease is stale once its start timestamp is older
    /// than `stale_after`. A missing start timestamp is stale by default:
    /// a coordination primitive must never block forever on a record it
    /// cannot date.
    pub fn is_stale(&self, now: Timestamp, stale_after: Duration) -> bool {
        if !self.action_in_progress {
            return false;
        }
        match self.action_started_at {
            Some(started_at) => age_of(started_at, now) >= stale_after,
            None => true,
        }
    }

    /// Remaining post-failure cooldown, if any. `None` means no cooldown
    /// applies (not failed, or the window has elapsed). A failed record
    /// without a datable attempt has nothing to anchor the window to and
    /// is treated as already cooled down.
    pub fn cooldown_remaining(&self, now: Timestamp, cooldown: Duration) -> Option<Duration> {
        if self.state() != LeaseState::Failed {
            return None;
        }
        let failed_at = self.last_attempt_at?;
        let age = age_of(failed_at, now);
        if age >= cooldown {
            None
        } else {
            Some(cooldown - age)
        }
    }

    /// Transition into `InProgress` for a new attempt.
    pub fn begin_attempt(&mut self, now: Timestamp) {
        self.action_in_progress = true;
        self.action_started_at = Some(now);
        self.last_attempt_at = Some(now);
    }

    /// Transition into terminal `Succeeded`.
    pub fn complete(&mut self, now: Timestamp) {
        self.action_sent = true;
        self.action_sent_at = Some(now);
        self.action_in_progress = false;
        self.action_failed = false;
        self.failure_message = None;
    }

    /// Transition into `Failed`, recording the reason and starting the
    /// cooldown clock.
    pub fn fail(&mut self, now: Timestamp, reason: impl Into<String>) {
        self.action_in_progress = false;
        self.action_failed = true;
        self.last_attempt_at = Some(now);
        self.failure_message = Some(reason.into());
        self.failure_count += 1;
    }

    /// Drop an abandoned in-flight claim, keeping the failure history.
    pub fn reclaim(&mut self) {
        self.action_in_progress = false;
        self.action_started_at = None;
    }
}

/// Why a `try_acquire` was denied, in the priority order the store
/// evaluates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The action already completed; terminal without an explicit force.
    AlreadySent { sent_at: Option<Timestamp> },
    /// Another worker's attempt is in flight and not yet stale.
    InFlight { started_at: Option<Timestamp> },
    /// The post-failure cooldown has not elapsed.
    CoolingDown { remaining: Duration },
    /// Lost the acquisition race to a concurrent caller.
    Contended,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::AlreadySent { .. } => write!(f, "already sent"),
            DenyReason::InFlight { .. } => write!(f, "attempt in progress"),
            DenyReason::CoolingDown { remaining } => {
                write!(f, "cooling down, {}s remaining", remaining.as_secs())
            }
            DenyReason::Contended => write!(f, "lost acquisition race"),
        }
    }
}

/// Outcome of a `try_acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    Granted {
        /// True when the grant reclaimed a stale in-progress lease.
        reclaimed_stale: bool,
    },
    Denied(DenyReason),
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted { .. })
    }
}

fn age_of(then: Timestamp, now: Timestamp) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// Deserialize a timestamp, mapping anything unparseable to `None` instead
/// of failing the whole record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value::<Option<Timestamp>>(raw).unwrap_or(None))
}

// ============================================================================
// TESTS
// ============================================================================
