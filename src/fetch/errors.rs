//! Error taxonomy for every outbound call (chain RPC, price, metadata,
//! aggregator and relay endpoints).
//!
//! Classification drives the retry combinator: only rate-limit and
//! transient transport failures are retried, everything else surfaces to
//! the caller on the first occurrence.

use solana_client::client_error::ClientError;
use thiserror::Error;

/// Error substring the aggregator uses when a route cannot absorb the full
/// input amount.
pub const PARTIAL_ROUTE_MARKER: &str = "ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT";

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The remote side asked us to slow down (HTTP 429 or equivalent).
    #[error("Rate limited by {service}: {message}")]
    RateLimited { service: String, message: String },

    /// Connection reset, DNS failure, TLS failure and similar.
    #[error("Transport error ({service}): {message}")]
    Transport { service: String, message: String },

    #[error("Timeout calling {service}")]
    Timeout { service: String },

    /// Non-success HTTP status with the response body.
    #[error("HTTP {status} from {service}: {body}")]
    Http {
        service: String,
        status: u16,
        body: String,
    },

    /// JSON-RPC level error returned by the node or the relay.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The payload could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl FetchError {
    /// Whether the fetch layer should retry the same operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport { .. } => true,
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Rpc(msg) => looks_rate_limited(msg),

            Self::Decode(_) => false,
            Self::NotFound(_) => false,
        }
    }

    /// Category label for metrics and structured logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Http { .. } => "http",
            Self::Rpc(_) => "rpc",
            Self::Decode(_) => "decode",
            Self::NotFound(_) => "not_found",
        }
    }

    /// The aggregator could not route the whole amount; the caller may retry
    /// with a smaller one.
    pub fn is_partial_route(&self) -> bool {
        match self {
            Self::Http { body, .. } => body.contains(PARTIAL_ROUTE_MARKER),
            Self::Rpc(msg) => msg.contains(PARTIAL_ROUTE_MARKER),
            _ => false,
        }
    }

    /// 4xx other than 429: the request itself is wrong for this input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Http { status, .. } if (400..500).contains(status) && *status != 429)
    }

    /// Build from a non-success HTTP response status and body.
    pub fn from_status(service: &str, status: u16, body: String) -> Self {
        if status == 429 {
            Self::RateLimited {
                service: service.to_string(),
                message: body,
            }
        } else {
            Self::Http {
                service: service.to_string(),
                status,
                body,
            }
        }
    }

    /// Classify a `reqwest` failure for the given service.
    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                service: service.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return Self::from_status(service, status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::Decode(format!("{service}: {err}"));
        }
        Self::Transport {
            service: service.to_string(),
            message: err.to_string(),
        }
    }

    /// Classify a Solana client error by its message, the same way the RPC
    /// layer distinguishes throttling from hard failures.
    pub fn from_client_error(err: ClientError) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if looks_rate_limited(&lower) {
            Self::RateLimited {
                service: "rpc".to_string(),
                message: msg,
            }
        } else if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout {
                service: "rpc".to_string(),
            }
        } else if lower.contains("connection")
            || lower.contains("error sending request")
            || lower.contains("broken pipe")
        {
            Self::Transport {
                service: "rpc".to_string(),
                message: msg,
            }
        } else {
            Self::Rpc(msg)
        }
    }
}

fn looks_rate_limited(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
}
