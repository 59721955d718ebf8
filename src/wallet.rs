//! Wallet capability boundary.
//!
//! The pipeline only needs a public key and a batch-sign call. A wallet
//! without either is "not ready", which callers treat as a state rather
//! than an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use thiserror::Error;

/// Signing failures surfaced by a wallet.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    /// The user declined the signing prompt.
    #[error("User rejected the request")]
    UserRejected,

    #[error("Wallet not ready: {0}")]
    NotReady(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Connected account, if any.
    fn public_key(&self) -> Option<Pubkey>;

    /// Whether `sign_all_transactions` is available.
    fn can_sign_all(&self) -> bool {
        true
    }

    /// Sign every transaction in one user interaction. Signatures are
    /// returned in input order.
    async fn sign_all_transactions(
        &self,
        txs: Vec<VersionedTransaction>,
    ) -> Result<Vec<VersionedTransaction>, WalletError>;
}

/// Local keypair wallet used by the command line tool.
pub struct KeypairWallet {
    keypair: Arc<Keypair>,
}

impl KeypairWallet {
    /// Load a keypair from a file holding either the 64 raw bytes or the
    /// JSON byte array written by `solana-keygen`.
    pub fn from_file(path: &str) -> Result<Self> {
        let path = expand_home(path);
        let keypair_bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read keypair file: {}", path))?;

        let keypair = if keypair_bytes.len() == 64 {
            // Raw bytes format - validate before conversion
            if keypair_bytes.iter().all(|&b| b == 0) {
                anyhow::bail!("Invalid keypair: all-zero key rejected");
            }
            Keypair::try_from(keypair_bytes.as_slice()).context("Invalid keypair bytes")?
        } else {
            let json: Vec<u8> = serde_json::from_slice(&keypair_bytes)
                .context("Failed to parse keypair JSON")?;
            if json.len() != 64 {
                anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", json.len());
            }
            if json.iter().all(|&b| b == 0) {
                anyhow::bail!("Invalid keypair: all-zero key rejected");
            }
            Keypair::try_from(json.as_slice()).context("Invalid keypair from JSON")?
        };

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl WalletSigner for KeypairWallet {
    fn public_key(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    async fn sign_all_transactions(
        &self,
        txs: Vec<VersionedTransaction>,
    ) -> Result<Vec<VersionedTransaction>, WalletError> {
        txs.into_iter()
            .map(|tx| {
                VersionedTransaction::try_new(tx.message, &[self.keypair.as_ref()])
                    .map_err(|e| WalletError::Signing(e.to_string()))
            })
            .collect()
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        message::{v0, VersionedMessage},
        system_instruction,
    };
    use std::io::Write;

    #[test]
    fn test_from_file_json_format() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let wallet = KeypairWallet::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_file_rejects_zero_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        assert!(KeypairWallet::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_sign_all_preserves_order() {
        let wallet = KeypairWallet::from_keypair(Keypair::new());
        let payer = wallet.pubkey();
        let txs: Vec<_> = (1..=3u64)
            .map(|lamports| {
                let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), lamports);
                let msg = v0::Message::try_compile(&payer, &[ix], &[], Hash::new_unique()).unwrap();
                VersionedTransaction {
                    signatures: vec![Default::default()],
                    message: VersionedMessage::V0(msg),
                }
            })
            .collect();
        let expected: Vec<_> = txs.iter().map(|t| t.message.clone()).collect();

        let signed = wallet.sign_all_transactions(txs).await.unwrap();
        assert_eq!(signed.len(), 3);
        for (tx, msg) in signed.iter().zip(expected) {
            assert_eq!(tx.message, msg);
            assert!(tx.verify_with_results().iter().all(|ok| *ok));
        }
    }
}
