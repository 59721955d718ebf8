//! Generic retry-with-backoff combinator.
//!
//! One implementation for every call site: attempts, base delay and the
//! "is this retryable" predicate are parameters. Backed by
//! `tokio_retry::RetryIf` so a sleeping retry parks on the tokio timer.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Retry configuration with jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0 to 1.0), upper bound of the random extra delay
    /// relative to the capped backoff
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_ms() -> u64 { 8_000 }
fn default_jitter_factor() -> f64 { 0.25 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff_ms: base_backoff.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Calculate backoff delay for a given retry (0-indexed)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(retry as i32);
        let capped = exp_backoff.min(self.max_backoff_ms as f64);

        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(0.0..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter) as u64)
    }

    /// Delays between attempts; one fewer than `max_attempts`.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let policy = self.clone();
        (0..self.max_attempts.saturating_sub(1)).map(move |retry| policy.backoff(retry))
    }
}

/// Run `operation` until it succeeds, fails with an error the predicate
/// rejects, or `policy.max_attempts` invocations have been made. The last
/// error is returned on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut is_retryable: P,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let mut failures = 0u32;
    let mut last_retryable = false;

    let result = RetryIf::start(policy.delays(), operation, |err: &E| {
        failures += 1;
        last_retryable = is_retryable(err);
        if last_retryable {
            debug!(
                operation = operation_name,
                attempt = failures,
                max_attempts = policy.max_attempts,
                error = %err,
                "Transient error, backing off before retry"
            );
        } else {
            warn!(
                operation = operation_name,
                error = %err,
                "Permanent error, not retrying"
            );
        }
        last_retryable
    })
    .await;

    match &result {
        Err(err) if last_retryable => warn!(
            operation = operation_name,
            attempts = failures,
            error = %err,
            "All retry attempts exhausted"
        ),
        Ok(_) if failures > 0 => debug!(
            operation = operation_name,
            attempts = failures + 1,
            "Operation succeeded after retry"
        ),
        _ => {}
    }

    result
}

/// Fixed-delay retry of any error, returning `None` once `attempts` are
/// used up. Used where a failure should drop one item, not the batch.
pub async fn retry_fixed_or_none<T, E, F, Fut>(
    operation_name: &str,
    attempts: u32,
    delay: Duration,
    operation: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let strategy = FixedInterval::new(delay).take(attempts.saturating_sub(1) as usize);
    match RetryIf::start(strategy, operation, |_: &E| true).await {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                operation = operation_name,
                attempts,
                error = %err,
                "Giving up after fixed-interval retries"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 300,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(300));
        assert_eq!(policy.backoff(6), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
            jitter_factor: 0.5,
        };
        for _ in 0..50 {
            let d = policy.backoff(0);
            assert!(d >= Duration::from_millis(1_000) && d <= Duration::from_millis(1_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), Flaky> = retry_with_backoff(
            "test",
            &RetryPolicy::default(),
            |e: &Flaky| e.0,
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky(false))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), Flaky> = retry_with_backoff(
            "test",
            &RetryPolicy::new(4, Duration::from_millis(10)),
            |e: &Flaky| e.0,
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky(true))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retry_returns_none_after_two_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Option<u8> = retry_fixed_or_none("token", 2, Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u8, _>(Flaky(false))
            }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
