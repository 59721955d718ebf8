//! Submission outcomes and unit identities.

use serde::Serialize;
use solana_sdk::signature::Signature;
use std::fmt;

/// Lifecycle of one submitted unit (a bundle or a single transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SubmissionOutcome {
    Pending,
    Accepted,
    Finalized,
    Rejected(String),
    Dropped,
    TimedOut,
}

impl SubmissionOutcome {
    /// Everything except `Pending` is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Landed on chain.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted | Self::Finalized)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Finalized => "finalized",
            Self::Rejected(_) => "rejected",
            Self::Dropped => "dropped",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Identity assigned to a unit once the relay or node accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UnitId {
    Bundle(String),
    Signature(#[serde(serialize_with = "serialize_signature")] Signature),
}

fn serialize_signature<S: serde::Serializer>(sig: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(sig)
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundle(id) => write!(f, "bundle:{id}"),
            Self::Signature(sig) => write!(f, "tx:{sig}"),
        }
    }
}
