//! # Exponential Backoff
//!
//! Bounded retry with exponential backoff for transient infrastructure
//! errors. Status-store writes, cloud instance-termination polling and
//! remote-job monitoring all retry through this helper; task execution
//! failures never do (those are deterministic and propagate immediately).

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff parameters with a bounded attempt count.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.powi(exponent as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Result summary for callers that need to know whether retries happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    pub attempts: u32,
}

/// Run `op` up to `policy.max_attempts` times, sleeping with exponential
/// backoff between attempts. Only errors accepted by `is_retryable` are
/// retried; everything else propagates on first occurrence.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> std::result::Result<(T, RetryOutcome), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok((value, RetryOutcome { attempts: attempt }));
            }
            Err(err) if is_retryable(&err) && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying with backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(5), "test op", |_: &String| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err("unreachable".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        let (value, outcome) = result.unwrap();
        assert_eq!(value, 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<((), _), String> =
            retry_with_backoff(&fast_policy(3), "test op", |_| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still down".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<((), _), String> =
            retry_with_backoff(&fast_policy(5), "test op", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("job failed".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
