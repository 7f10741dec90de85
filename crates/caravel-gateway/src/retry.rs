//! Generic retry with exponential backoff.
//!
//! Every gateway interaction runs through [`retry`]. Attempts are re-issued
//! only for retryable errors (kind `Transient`), bounded by both an attempt
//! count and a wall clock. The `on_retry` hook runs before each re-attempt
//! and is where the destination host picker advances; it is never invoked
//! for a terminal error.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

use caravel_core::config::RetryConfig;
use caravel_core::error::{ReplicationError, Result};

/// Backoff and bounds for one retry cycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum re-attempts after the first failure.
    pub max_retries: u32,
    /// Wall-clock bound on the whole cycle.
    pub timeout: Duration,
    /// Minimum backoff.
    pub backoff_min: Duration,
    /// Maximum backoff.
    pub backoff_max: Duration,
    /// Backoff multiplier per retry.
    pub factor: f64,
    /// Jitter fraction in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Builds a policy from worker configuration.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout: config.timeout_duration(),
            backoff_min: Duration::from_millis(config.backoff_min_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            factor: config.backoff_factor,
            jitter: config.backoff_jitter.clamp(0.0, 1.0),
        }
    }

    /// A policy suitable for tests: immediate backoff, short timeout.
    #[must_use]
    pub fn fast(max_retries: u32) -> Self {
        Self {
            max_retries,
            timeout: Duration::from_secs(5),
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            factor: 1.5,
            jitter: 0.0,
        }
    }

    /// The backoff to sleep before re-attempt number `retry` (0-based).
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let base = self.backoff_min.as_millis() as f64 * self.factor.powi(retry as i32);
        let capped = base.min(self.backoff_max.as_millis() as f64);
        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped - spread + rand::thread_rng().gen_range(0.0..=spread * 2.0)
        } else {
            capped
        };
        Duration::from_millis(jittered.min(self.backoff_max.as_millis() as f64) as u64)
    }
}

/// Runs `attempt` until it succeeds, fails terminally, or the policy's
/// bounds are exhausted.
///
/// `on_retry` is invoked with the failed attempt's error before each
/// re-attempt; gateway state (host failover, client re-binding) mutates
/// there.
///
/// # Errors
///
/// Returns the last attempt's error: terminal errors immediately, retryable
/// errors once `max_retries` or the wall clock is exhausted.
pub async fn retry<T, F, Fut, H>(
    describe: &str,
    policy: &RetryPolicy,
    mut attempt: F,
    mut on_retry: H,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    H: FnMut(&ReplicationError),
{
    let started = Instant::now();
    let mut retries: u32 = 0;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if retries >= policy.max_retries {
                    warn!(
                        call = describe,
                        error = %err,
                        retries,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_for(retries);
                if started.elapsed() + backoff >= policy.timeout {
                    warn!(
                        call = describe,
                        error = %err,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "retry timeout exceeded"
                    );
                    return Err(err);
                }

                warn!(
                    call = describe,
                    error = %err,
                    retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after backoff"
                );
                on_retry(&err);
                tokio::time::sleep(backoff).await;
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use caravel_core::error::ErrorOrigin;

    use super::*;

    fn transient() -> ReplicationError {
        ReplicationError::transient(ErrorOrigin::Target, "503")
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry(
            "op",
            &RetryPolicy::fast(3),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ReplicationError>(7) }
            },
            |_| {},
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let hooks = AtomicU32::new(0);
        let result = retry(
            "op",
            &RetryPolicy::fast(5),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(transient()) } else { Ok(n) } }
            },
            |_| {
                hooks.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let hooks = AtomicU32::new(0);
        let result: Result<()> = retry(
            "op",
            &RetryPolicy::fast(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ReplicationError::permanent_target("NotImplemented")) }
            },
            |_| {
                hooks.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The hook never fires for a terminal error.
        assert_eq!(hooks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_max_retries_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            "op",
            &RetryPolicy::fast(3),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            },
            |_| {},
        )
        .await;

        assert!(result.unwrap_err().is_retryable());
        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            "op",
            &RetryPolicy::fast(0),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            },
            |_| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wall_clock_bound() {
        let policy = RetryPolicy {
            max_retries: 1_000,
            timeout: Duration::from_millis(30),
            backoff_min: Duration::from_millis(20),
            backoff_max: Duration::from_millis(20),
            factor: 1.0,
            jitter: 0.0,
        };

        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            "op",
            &policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            },
            |_| {},
        )
        .await;

        assert!(result.is_err());
        // The clock cuts the cycle well short of 1000 retries.
        assert!(calls.load(Ordering::SeqCst) < 5);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            timeout: Duration::from_secs(300),
            backoff_min: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(4_000),
            factor: 2.0,
            jitter: 0.0,
        };

        assert_eq!(policy.backoff_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(4_000));
        // Capped at the maximum.
        assert_eq!(policy.backoff_for(5), Duration::from_millis(4_000));
    }

    #[test]
    fn test_backoff_jitter_stays_bounded() {
        let policy = RetryPolicy {
            max_retries: 10,
            timeout: Duration::from_secs(300),
            backoff_min: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(300_000),
            factor: 1.0,
            jitter: 0.1,
        };

        for _ in 0..100 {
            let backoff = policy.backoff_for(0).as_millis() as u64;
            assert!((900..=1_100).contains(&backoff), "jittered backoff {backoff} out of range");
        }
    }
}
