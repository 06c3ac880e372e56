//! LEADLOOP LLM - Fit Scoring
//!
//! Provider-agnostic trait for scoring a listing against the operator's
//! profile, a deterministic mock for tests, and the `ScoringService` that
//! composes the provider with the coordination layer: cache lookup,
//! cooldown check, retried call, cache fill. Actual provider
//! implementations (prompt text included) are user-supplied.

use async_trait::async_trait;
use leadloop_core::{FetchError, FitScore, ProjectListing, RetryError, RetryPolicy, StoreError};
use leadloop_coord::{CacheLookup, FileCache, RateLimitCoordinator};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Cache namespace for fit scores.
pub const SCORE_NAMESPACE: &str = "llm-score";

/// Retry/cooldown context string for scoring calls.
pub const SCORE_CONTEXT: &str = "llm-score";

// ============================================================================
// FIT SCORER TRAIT
// ============================================================================

/// Trait for fit-scoring providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct ClaudeScorer { /* ... */ }
///
/// #[async_trait]
/// impl FitScorer for ClaudeScorer {
///     async fn score(&self, listing: &ProjectListing) -> Result<FitScore, FetchError> {
///         // Call the model API
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait FitScorer: Send + Sync {
    /// Score one listing against the operator's profile.
    ///
    /// # Returns
    /// * `Ok(FitScore)` - The fit score
    /// * `Err(FetchError)` - Transient, rate-limited, or invalid-response
    ///   failure; the caller decides whether to retry or degrade
    async fn score(&self, listing: &ProjectListing) -> Result<FitScore, FetchError>;

    /// Get the model identifier for this provider.
    fn model_id(&self) -> &str;
}

// ============================================================================
// SCORING SERVICE
// ============================================================================

/// Outcome of a scoring request, as seen by the Scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// A score, freshly computed or served from cache.
    Scored { fit: FitScore, from_cache: bool },
    /// The shared cooldown is armed; no call was made.
    SkippedRateLimited,
}

/// Read-through scoring: cache in front, cooldown gate, retried provider
/// call behind. The cache is keyed by listing id plus a content digest so
/// an edited listing re-scores while an unchanged one never burns a call.
pub struct ScoringService {
    scorer: Arc<dyn FitScorer>,
    cache: FileCache,
    limiter: Arc<RateLimitCoordinator>,
    retry: RetryPolicy,
}

impl ScoringService {
    pub fn new(
        scorer: Arc<dyn FitScorer>,
        cache: FileCache,
        limiter: Arc<RateLimitCoordinator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            scorer,
            cache,
            limiter,
            retry,
        }
    }

    /// Score a listing. Returns the typed outcome; the only `Err` is an
    /// exhausted retry loop, carrying the final attempt's failure.
    pub async fn score(&self, listing: &ProjectListing) -> Result<ScoreOutcome, FetchError> {
        let key = score_cache_key(listing);

        if let CacheLookup::Hit(hit) = self.cache.get::<FitScore>(SCORE_NAMESPACE, &key) {
            tracing::debug!(
                listing = %listing.id,
                age_secs = hit.age.as_secs(),
                "Fit score served from cache"
            );
            return Ok(ScoreOutcome::Scored {
                fit: hit.value,
                from_cache: true,
            });
        }

        if self.limiter.is_blocked(SCORE_CONTEXT) {
            return Ok(ScoreOutcome::SkippedRateLimited);
        }

        let result = self
            .retry
            .run(SCORE_CONTEXT, || self.scorer.score(listing))
            .await;

        match result {
            Ok(fit) => {
                if let Err(e) = self.cache.set(SCORE_NAMESPACE, &key, &fit) {
                    // Cache trouble degrades the optimization, not the scan.
                    log_cache_write_failure(&e);
                }
                Ok(ScoreOutcome::Scored {
                    fit,
                    from_cache: false,
                })
            }
            Err(RetryError::RateLimited { .. }) => {
                if let Err(e) = self.limiter.arm(SCORE_CONTEXT) {
                    tracing::error!(error = %e, "Failed to arm rate-limit cooldown");
                }
                Ok(ScoreOutcome::SkippedRateLimited)
            }
            Err(RetryError::Exhausted { last, .. }) => Err(last),
            Err(RetryError::Cancelled { .. }) => Err(FetchError::Transient {
                dependency: SCORE_CONTEXT.to_string(),
                reason: "cancelled by shutdown".to_string(),
            }),
        }
    }
}

fn log_cache_write_failure(e: &StoreError) {
    tracing::warn!(error = %e, "Failed to cache fit score, continuing without");
}

/// Cache key: listing id plus an 8-byte digest of the scored content.
pub fn score_cache_key(listing: &ProjectListing) -> String {
    let mut hasher = Sha256::new();
    hasher.update(listing.title.as_bytes());
    hasher.update([0xff]);
    hasher.update(listing.description.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..8]);
    format!("{}-{}", listing.id, digest)
}

// ============================================================================
// MOCK PROVIDER FOR TESTING
// ============================================================================

/// Mock scorer producing deterministic scores from the listing content.
#[derive(Debug, Clone)]
pub struct MockFitScorer {
    model_id: String,
}

impl MockFitScorer {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

impl Default for MockFitScorer {
    fn default() -> Self {
        Self::new("mock-scorer")
    }
}

#[async_trait]
impl FitScorer for MockFitScorer {
    async fn score(&self, listing: &ProjectListing) -> Result<FitScore, FetchError> {
        // Deterministic pseudo-score from the content digest.
        let digest = Sha256::digest(listing.description.as_bytes());
        let score = (u16::from_be_bytes([digest[0], digest[1]]) as f32) / (u16::MAX as f32);
        Ok(FitScore {
            score,
            verdict: FitScore::verdict_for(score),
            rationale: format!("mock verdict for '{}'", listing.title),
            model_id: self.model_id.clone(),
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
