//! Chain access used by the pipeline.
//!
//! `ChainRpc` is the seam between the pipeline and the node: the production
//! implementation wraps the nonblocking `RpcClient`, tests substitute an
//! in-memory chain.

mod solana;

pub use solana::SolanaRpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};

use crate::fetch::FetchError;

/// One SPL token account owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccountEntry {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub raw_amount: u64,
    pub decimals: u8,
}

/// Commitment reached by a transaction or bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    Processed,
    Confirmed,
    Finalized,
}

impl ConfirmationLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(Self::Processed),
            "confirmed" => Some(Self::Confirmed),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// Status of a single signature as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureState {
    pub confirmation: Option<ConfirmationLevel>,
    pub err: Option<String>,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// All accounts owned by `owner` under the SPL Token program.
    async fn token_accounts_by_owner(&self, owner: &Pubkey) -> Result<Vec<TokenAccountEntry>, FetchError>;

    /// Raw account data; `None` when the account does not exist.
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError>;

    /// Raw data for several accounts, positionally matched to `addresses`.
    async fn multiple_account_data(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, FetchError>;

    async fn latest_blockhash(&self) -> Result<Hash, FetchError>;

    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature, FetchError>;

    async fn signature_statuses(&self, signatures: &[Signature]) -> Result<Vec<Option<SignatureState>>, FetchError>;
}
