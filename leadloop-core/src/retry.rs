//! Retry-with-backoff discipline for outbound calls.
//!
//! Every call to a transient-failure-prone dependency (LLM scoring,
//! reputation lookup, exchange-rate fetch, listings page) goes through a
//! [`RetryPolicy`]. Backoff is linear by design - the dependencies involved
//! see low request volume, so exponential growth buys nothing.
//!
//! A rate-limit classification short-circuits everything: the policy stops
//! immediately and the caller arms the shared rate-limit coordinator
//! instead of burning its remaining attempts.

use crate::config::env_secs;
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use crate::error::FetchError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Classification hook for retryable errors.
pub trait Retryable {
    /// True for the 429-class signal that must not be retried locally.
    fn is_rate_limited(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_rate_limited(&self) -> bool {
        FetchError::is_rate_limited(self)
    }
}

/// Typed outcome of an exhausted or short-circuited retry loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// All attempts failed; `last` is the final attempt's error.
    #[error("{context} gave up after {attempts} attempts: {last}")]
    Exhausted {
        context: String,
        attempts: u32,
        last: E,
    },

    /// A rate-limit signal ended the loop early. The caller should arm
    /// the shared coordinator.
    #[error("{context} hit a rate limit")]
    RateLimited { context: String },

    /// Shutdown was requested during a backoff sleep.
    #[error("{context} cancelled by shutdown")]
    Cancelled { context: String },
}

impl<E> RetryError<E> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RetryError::RateLimited { .. })
    }
}

/// Linear-backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up (default: 3).
    pub max_retries: u32,
    /// Base delay; attempt N is followed by a sleep of `N * retry_delay`
    /// (default: 2 seconds).
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a RetryPolicy from environment variables.
    ///
    /// # Environment Variables
    /// - `LEADLOOP_MAX_RETRIES`: attempts per call (default: 3)
    /// - `LEADLOOP_RETRY_DELAY_SECS`: base backoff delay (default: 2)
    pub fn from_env() -> Self {
        Self {
            max_retries: std::env::var("LEADLOOP_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: env_secs("LEADLOOP_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_MS / 1000),
        }
    }

    /// Run `op` up to `max_retries` times with linear backoff.
    ///
    /// Returns the first success, or a typed [`RetryError`]. A rate-limit
    /// classification stops the loop on the spot.
    pub async fn run<T, E, F, Fut>(&self, context: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Channel held open for the duration of the call; never fires.
        let (_tx, mut rx) = watch::channel(false);
        self.run_with_shutdown(context, &mut rx, op).await
    }

    /// Like [`run`](Self::run), but backoff sleeps race the shutdown
    /// signal so a stopping process never sits out a full backoff.
    pub async fn run_with_shutdown<T, E, F, Fut>(
        &self,
        context: &str,
        shutdown: &mut watch::Receiver<bool>,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_retries.max(1);
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    tracing::warn!(context, attempt, "Rate limit signal, aborting retries");
                    return Err(RetryError::RateLimited {
                        context: context.to_string(),
                    });
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            context,
                            attempts = attempt,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            context: context.to_string(),
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.retry_delay * attempt;
                    tracing::debug!(
                        context,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, backing off"
                    );
                    if !sleep_or_shutdown(delay, shutdown).await {
                        return Err(RetryError::Cancelled {
                            context: context.to_string(),
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Sleep for `delay`, waking early on shutdown. Returns false when the
/// sleep was interrupted by a shutdown request (or a closed channel).
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(reason: &str) -> FetchError {
        FetchError::Transient {
            dependency: "test-dep".to_string(),
            reason: reason.to_string(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_retry() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = policy()
            .run("test", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<_, FetchError>(n) }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let attempts = AtomicU32::new(0);
        let result = policy()
            .run("test", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(transient("flaky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("test", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient("always down")) }
            })
            .await;
        match result {
            Err(RetryError::Exhausted { attempts: n, last, .. }) => {
                assert_eq!(n, 3);
                assert!(format!("{}", last).contains("always down"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_short_circuits() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("llm-score", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::RateLimited {
                        dependency: "llm".to_string(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(RetryError::RateLimited { .. })));
        // No second attempt after the 429-class signal.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let start = tokio::time::Instant::now();
        let attempts = AtomicU32::new(0);
        let _: Result<(), _> = policy()
            .run("test", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient("down")) }
            })
            .await;
        // Sleeps of 100ms and 200ms between the three attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(500), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let (tx, mut rx) = watch::channel(false);
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(3600),
        };
        let handle = tokio::spawn(async move {
            policy
                .run_with_shutdown("test", &mut rx, || async {
                    Err::<(), _>(transient("down"))
                })
                .await
        });
        // Let the first attempt fail and enter its hour-long backoff.
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_retries_still_attempts_once() {
        let policy = RetryPolicy {
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
        };
        let attempts = AtomicU32::new(0);
        let _: Result<(), _> = policy
            .run("test", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient("down")) }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
