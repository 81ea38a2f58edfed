//! Retry policy and the shared retry loop.
//!
//! Transient provider failures are retried with exponential backoff and
//! jitter, capped at `max_delay`, up to `max_retries` attempts. Permanent
//! and malformed errors are surfaced immediately.

use crate::error::ProviderError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff configuration for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "crate::duration_serde")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "crate::duration_serde")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter, in [0, 1]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Run `operation`, retrying retryable failures per `policy`.
///
/// Rate-limited errors that carry a reset time sleep until that time when
/// it lands inside the delay cap; otherwise the normal backoff applies.
pub async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;

                if attempt > policy.max_retries || !error.is_retryable() {
                    return Err(error);
                }

                let actual_delay = match error.rate_limit_reset() {
                    Some(reset_at) => {
                        let until_reset = (reset_at - chrono::Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        until_reset.min(policy.max_delay).max(delay)
                    }
                    None => {
                        // Jitter keeps concurrent retries from thundering in lockstep
                        let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..=policy.jitter_factor));
                        delay + jitter
                    }
                };

                tracing::debug!(
                    attempt,
                    delay_ms = actual_delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::time::sleep(actual_delay).await;

                delay = std::cmp::min(delay.mul_f64(policy.backoff_multiplier), policy.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient {
                        message: "blip".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Transient {
                    message: "still down".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        // Initial attempt plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Permanent {
                    message: "bad request".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
