//! Constants for LEADLOOP
//!
//! All policy windows live here. They are deliberately fixed, named
//! defaults rather than adaptive values; every one of them can be
//! overridden through the matching LEADLOOP_* environment variable.

// ============================================================================
// RATE-LIMIT COOLDOWN
// ============================================================================

/// How long the shared cooldown stays armed after a 429-class response
/// (30 minutes).
pub const DEFAULT_COOLDOWN_SECS: u64 = 1800;

/// Minimum gap between "still blocked" log lines per caller context,
/// so a hot polling loop cannot storm the log.
pub const DEFAULT_BLOCKED_LOG_INTERVAL_SECS: u64 = 60;

// ============================================================================
// IDEMPOTENCY LEASE
// ============================================================================

/// An in-progress lease older than this is considered abandoned and may be
/// reclaimed by any worker (30 minutes).
pub const DEFAULT_LEASE_STALE_SECS: u64 = 1800;

/// After a failed attempt, new attempts on the same lease are rejected for
/// this long (5 minutes).
pub const DEFAULT_FAILURE_COOLDOWN_SECS: u64 = 300;

/// A lease-acquisition guard file older than this is treated as the debris
/// of a crashed acquirer and removed.
pub const DEFAULT_GUARD_STALE_SECS: u64 = 60;

/// Action name for the one-shot question post.
pub const POST_QUESTION_ACTION: &str = "post_question";

// ============================================================================
// HEARTBEATS
// ============================================================================

/// Maximum allowed gap between heartbeats before a process is considered
/// dead (60 seconds).
pub const DEFAULT_LIVENESS_WINDOW_SECS: u64 = 60;

/// Heartbeat registry entries older than this are garbage-collected
/// (24 hours).
pub const DEFAULT_HEARTBEAT_REAP_SECS: u64 = 86400;

// ============================================================================
// TTL CACHE
// ============================================================================

/// Default entry lifetime when a namespace does not override it (1 hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Longest cache/lease file stem the stores will produce; longer keys are
/// truncated head/tail-preserving around a digest.
pub const MAX_FILE_STEM_LEN: usize = 120;

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Attempts per outbound call before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base backoff delay; attempt N sleeps N times this (linear backoff).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
