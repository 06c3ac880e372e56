//! LEADLOOP Core - Shared Types
//!
//! Domain types, error taxonomy, policy configuration, and the
//! retry-with-backoff discipline shared by every LEADLOOP process.
//! The file-backed coordination primitives themselves live in
//! `leadloop-coord`; this crate holds the types they exchange.

use chrono::{DateTime, Utc};

pub mod config;
pub mod constants;
pub mod error;
pub mod heartbeat;
pub mod lease;
pub mod listing;
pub mod retry;

pub use config::CoordinationConfig;
pub use error::{ConfigError, FetchError, LeadloopError, LeadloopResult, StoreError};
pub use heartbeat::{HeartbeatDocument, ProcessHeartbeat, ProcessLiveness};
pub use lease::{Acquire, DenyReason, LeaseRecord, LeaseState};
pub use listing::{FitScore, FitVerdict, ListingId, ProjectListing, ReputationProfile, ScoredListing};
pub use retry::{RetryError, RetryPolicy};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
