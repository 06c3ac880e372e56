//! LEADLOOP Coordination Layer
//!
//! File-backed primitives that let independent processes on one machine
//! cooperate without a database, broker, or lock service:
//!
//! - [`cache::FileCache`] - TTL-keyed cache for expensive API/LLM responses
//! - [`cooldown::RateLimitCoordinator`] - shared circuit breaker for
//!   rate-limited external APIs
//! - [`heartbeat::HeartbeatRegistry`] - liveness registry for dashboards
//! - [`lease::LeaseStore`] - at-most-once idempotency lease for
//!   side-effecting actions
//!
//! Every on-disk record is written via atomic replace (temp file + rename)
//! so a concurrent reader never observes a half-written record. Degraded
//! reads (missing, expired, corrupt) surface as typed absence, never as
//! errors; only failed writes propagate.

pub mod cache;
pub mod cooldown;
pub mod fsio;
pub mod heartbeat;
pub mod lease;

pub use cache::{CacheHit, CacheLookup, FileCache};
pub use cooldown::{CooldownStatus, RateLimitCoordinator};
pub use heartbeat::HeartbeatRegistry;
pub use lease::LeaseStore;
