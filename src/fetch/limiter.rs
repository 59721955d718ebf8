//! Concurrency + pacing limiter.
//!
//! A limiter admits at most `max_concurrent` operations at once and spaces
//! operation starts by at least `min_interval` (GCRA via `governor`).

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::errors::FetchError;

type Pace = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Limiter settings for one class of outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum spacing between operation starts in milliseconds; 0 disables
    /// pacing.
    #[serde(default)]
    pub min_interval_ms: u64,
}

fn default_max_concurrent() -> usize { 3 }

impl LimiterConfig {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            max_concurrent,
            min_interval_ms: min_interval.as_millis() as u64,
        }
    }

    /// Chain RPC defaults: 5 in flight, 200ms apart.
    pub fn rpc_default() -> Self {
        Self::new(5, Duration::from_millis(200))
    }

    /// Third-party HTTP API defaults: 3 in flight, 333ms apart.
    pub fn api_default() -> Self {
        Self::new(3, Duration::from_millis(333))
    }
}

pub struct Limiter {
    name: &'static str,
    permits: Arc<Semaphore>,
    pace: Option<Pace>,
}

impl Limiter {
    pub fn new(name: &'static str, config: &LimiterConfig) -> Self {
        let pace = Quota::with_period(Duration::from_millis(config.min_interval_ms))
            .map(GovernorLimiter::direct);
        Self {
            name,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            pace,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Operations currently allowed to start without waiting on a permit.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot, then run the operation while holding it.
    pub async fn run<T, Fut>(&self, operation: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Transport {
                service: self.name.to_string(),
                message: "limiter closed".to_string(),
            })?;
        if let Some(pace) = &self.pace {
            pace.until_ready().await;
        }
        operation.await
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("name", &self.name)
            .field("available_permits", &self.permits.available_permits())
            .field("paced", &self.pace.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrency_ceiling_respected() {
        let limiter = Arc::new(Limiter::new("test", &LimiterConfig::new(2, Duration::ZERO)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, FetchError>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.available_permits(), 2);
    }

    #[test]
    fn test_zero_interval_disables_pacing() {
        let limiter = Limiter::new("rpc", &LimiterConfig::new(1, Duration::ZERO));
        assert!(limiter.pace.is_none());
        let paced = Limiter::new("api", &LimiterConfig::api_default());
        assert!(paced.pace.is_some());
    }
}
