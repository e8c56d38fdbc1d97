//! Retry utilities: exponential backoff with jitter for transient provider
//! transport failures, used internally by [`crate::provider`] before a
//! failure is allowed to surface as a terminal [`crate::error::Error`].
//!
//! Kept public so callers driving their own provider-adjacent operations
//! (e.g. a custom tool that calls out to another HTTP service) can reuse the
//! same backoff shape instead of hand-rolling one.

use std::time::Duration;

use rand::Rng;

/// Backoff configuration. `base` doubles each attempt up to `max`, then a
/// random jitter in `[0, jitter_fraction * delay]` is added so concurrent
/// retries don't synchronize into a thundering herd.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(250),
            max: Duration::from_secs(10),
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    /// The delay to sleep before attempt `attempt` (0-indexed; `attempt == 0`
    /// means the delay before the first retry, after the initial failed try).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(20);
        let scaled = self.base.as_millis().saturating_mul(1u128 << exponent);
        let capped = scaled.min(self.max.as_millis());
        let mut rng = rand::thread_rng();
        let jitter_millis = (capped as f64 * self.jitter_fraction * rng.gen_range(0.0..1.0)) as u128;
        Duration::from_millis((capped + jitter_millis) as u64)
    }
}

/// Run `operation` up to `policy.max_attempts` times, sleeping with
/// exponential backoff + jitter between attempts, retrying only while
/// `should_retry` returns `true` for the error. Returns the last error if
/// every attempt is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    should_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts && should_retry(&err) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
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

    #[test]
    fn delay_grows_and_stays_bounded() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
            jitter_fraction: 0.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(20), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_without_retrying_when_first_attempt_ok() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry_with_backoff(
            &policy,
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_attempt_budget() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter_fraction: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry_with_backoff(
            &policy,
            |_: &&str| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_retrying_when_should_retry_returns_false() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter_fraction: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry_with_backoff(
            &policy,
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget_and_returns_last_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter_fraction: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<i32, &str> = retry_with_backoff(
            &policy,
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always fails") }
            },
        )
        .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
