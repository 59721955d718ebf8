//! Lock-in sweeper library
//!
//! Inventories a wallet's token holdings, prices them and batch-converts a
//! selection into one target token through a swap aggregator, closing empty
//! token accounts and optionally bundling the transactions through a
//! block-engine relay.

pub mod compat;
pub mod config;
pub mod fetch;
pub mod holdings;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod rpc;
pub mod services;
pub mod structured_logging;
pub mod submit;
pub mod tx_builder;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests {
    mod bundle_submission_tests;
    mod direct_submission_tests;
    mod lock_in_scenarios;
    mod poller_tests;
}

// Re-export commonly used types
pub use pipeline::{HoldingOutcome, HoldingStatus, LockInPipeline, LockInReport, PipelineError, Summary};
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
