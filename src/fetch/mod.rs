//! Rate-limited fetch layer.
//!
//! Two independent limiters (chain RPC and third-party HTTP APIs) each with
//! their own concurrency ceiling and start interval; every scheduled
//! operation is retried with backoff on rate-limit and transient errors.
//! Per-token and single-attempt calls go through the same limiters.
//! Instances are built from config and injected; nothing here is global.

pub mod errors;
pub mod limiter;
pub mod retry;

pub use errors::{FetchError, PARTIAL_ROUTE_MARKER};
pub use limiter::{Limiter, LimiterConfig};
pub use retry::{retry_fixed_or_none, retry_with_backoff, RetryPolicy};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;

/// Fetch layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "LimiterConfig::rpc_default")]
    pub rpc: LimiterConfig,

    #[serde(default = "LimiterConfig::api_default")]
    pub api: LimiterConfig,

    /// Backoff for rate-limited and transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Attempts for per-token enrichment calls
    #[serde(default = "default_token_retry_attempts")]
    pub token_retry_attempts: u32,

    /// Fixed delay between per-token attempts
    #[serde(default = "default_token_retry_delay_ms")]
    pub token_retry_delay_ms: u64,
}

fn default_token_retry_attempts() -> u32 { 2 }
fn default_token_retry_delay_ms() -> u64 { 1_000 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            rpc: LimiterConfig::rpc_default(),
            api: LimiterConfig::api_default(),
            retry: RetryPolicy::default(),
            token_retry_attempts: default_token_retry_attempts(),
            token_retry_delay_ms: default_token_retry_delay_ms(),
        }
    }
}

#[derive(Debug)]
pub struct FetchLayer {
    rpc: Limiter,
    api: Limiter,
    retry: RetryPolicy,
    token_retry_attempts: u32,
    token_retry_delay: Duration,
    metrics: Arc<Metrics>,
}

impl FetchLayer {
    pub fn new(config: &FetchConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            rpc: Limiter::new("rpc", &config.rpc),
            api: Limiter::new("api", &config.api),
            retry: config.retry.clone(),
            token_retry_attempts: config.token_retry_attempts.max(1),
            token_retry_delay: Duration::from_millis(config.token_retry_delay_ms),
            metrics,
        }
    }

    /// Run a chain RPC operation behind the RPC limiter.
    pub async fn schedule_rpc<T, F, Fut>(&self, op_name: &str, operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.schedule(&self.rpc, op_name, operation).await
    }

    /// Run an HTTP API operation (price, metadata, aggregator, relay) behind
    /// the API limiter.
    pub async fn schedule_api<T, F, Fut>(&self, op_name: &str, operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.schedule(&self.api, op_name, operation).await
    }

    async fn schedule<T, F, Fut>(
        &self,
        limiter: &Limiter,
        op_name: &str,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let timer = std::time::Instant::now();
        let mut attempts = 0u32;
        let result = retry_with_backoff(
            op_name,
            &self.retry,
            |err: &FetchError| err.is_retryable(),
            || {
                attempts += 1;
                if attempts > 1 {
                    self.metrics.fetch_retries.inc();
                }
                limiter.run(operation())
            },
        )
        .await;

        self.metrics
            .fetch_latency
            .with_label_values(&[limiter.name()])
            .observe(timer.elapsed().as_secs_f64());
        if let Err(err) = &result {
            self.metrics
                .fetch_failures
                .with_label_values(&[limiter.name(), err.category()])
                .inc();
        }
        result
    }

    /// Per-token chain read: fixed delay, any error retried, `None` once the
    /// attempts are exhausted so the caller can drop just this item. Each
    /// attempt waits on the RPC limiter.
    pub async fn with_token_retry_rpc<T, F, Fut>(&self, op_name: &str, operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.token_retry(&self.rpc, op_name, operation).await
    }

    /// Per-token API call, same contract as [`Self::with_token_retry_rpc`]
    /// behind the API limiter.
    pub async fn with_token_retry_api<T, F, Fut>(&self, op_name: &str, operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.token_retry(&self.api, op_name, operation).await
    }

    async fn token_retry<T, F, Fut>(&self, limiter: &Limiter, op_name: &str, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        retry_fixed_or_none(
            op_name,
            self.token_retry_attempts,
            self.token_retry_delay,
            || limiter.run(operation()),
        )
        .await
    }

    /// Single RPC attempt behind the limiter, no backoff. For callers that
    /// already loop on their own schedule.
    pub async fn once_rpc<T, Fut>(&self, op_name: &str, operation: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.once(&self.rpc, op_name, operation).await
    }

    /// Single API attempt behind the limiter, no backoff.
    pub async fn once_api<T, Fut>(&self, op_name: &str, operation: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.once(&self.api, op_name, operation).await
    }

    async fn once<T, Fut>(&self, limiter: &Limiter, op_name: &str, operation: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let timer = std::time::Instant::now();
        let result = limiter.run(operation).await;
        self.metrics
            .fetch_latency
            .with_label_values(&[limiter.name()])
            .observe(timer.elapsed().as_secs_f64());
        if let Err(err) = &result {
            tracing::debug!(operation = op_name, error = %err, "Single attempt failed");
            self.metrics
                .fetch_failures
                .with_label_values(&[limiter.name(), err.category()])
                .inc();
        }
        result
    }
}
