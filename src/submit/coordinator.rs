//! Signing and submission coordinator
//!
//! One fresh blockhash and one wallet prompt for the whole action, then the
//! signed transactions go out unit by unit: as relay bundles in bundle mode,
//! one by one to the node in direct mode. Nothing is resubmitted.

use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use super::outcome::UnitId;
use crate::config::{RelayConfig, RelayMode};
use crate::fetch::{FetchError, FetchLayer};
use crate::metrics::Metrics;
use crate::rpc::ChainRpc;
use crate::services::Relay;
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{PackedTransaction, TransactionBuilderError};
use crate::wallet::{WalletError, WalletSigner};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Failed to fetch blockhash: {0}")]
    Blockhash(FetchError),

    #[error("Failed to compile transaction: {0}")]
    Compile(#[from] TransactionBuilderError),

    #[error("Wallet error: {0}")]
    Signing(#[from] WalletError),

    #[error("Wallet returned {got} signed transactions, expected {expected}")]
    SignatureCount { expected: usize, got: usize },
}

/// Where a unit stands right after the submission pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Accepted by the relay or node, awaiting confirmation
    Submitted(UnitId),
    /// The relay or node refused it
    Failed(String),
    /// Its blockhash was too old to send
    Stale,
    /// Not sent because the action was cancelled
    NotSent,
}

/// A bundle (bundle mode) or a single transaction (direct mode)
#[derive(Debug, Clone)]
pub struct SubmittedUnit {
    pub index: usize,
    pub transactions: Vec<PackedTransaction>,
    pub status: UnitStatus,
}

impl SubmittedUnit {
    /// Labels of every item carried by the unit.
    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.transactions.iter().flat_map(|tx| tx.labels.iter())
    }

    pub fn closed_accounts(&self) -> impl Iterator<Item = &Pubkey> {
        self.transactions.iter().flat_map(|tx| tx.closed_accounts.iter())
    }
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Wallet has no public key or cannot batch-sign
    NotReady(String),
    /// The user declined to sign; nothing was sent
    Cancelled,
    Submitted(Vec<SubmittedUnit>),
}

pub struct SubmissionCoordinator {
    chain: Arc<dyn ChainRpc>,
    relay: Arc<dyn Relay>,
    wallet: Arc<dyn WalletSigner>,
    fetch: Arc<FetchLayer>,
    metrics: Arc<Metrics>,
    config: RelayConfig,
}

impl SubmissionCoordinator {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        relay: Arc<dyn Relay>,
        wallet: Arc<dyn WalletSigner>,
        fetch: Arc<FetchLayer>,
        metrics: Arc<Metrics>,
        config: RelayConfig,
    ) -> Self {
        Self {
            chain,
            relay,
            wallet,
            fetch,
            metrics,
            config,
        }
    }

    /// Sign everything with one wallet call and submit unit by unit.
    ///
    /// A `true` on `cancel` stops further units from being sent; units
    /// already sent are unaffected.
    pub async fn submit(
        &self,
        mut packed: Vec<PackedTransaction>,
        cancel: &watch::Receiver<bool>,
        logger: &StructuredLogger,
    ) -> Result<SubmitOutcome, SubmitError> {
        let payer = match self.wallet.public_key() {
            Some(key) if self.wallet.can_sign_all() => key,
            Some(_) => return Ok(SubmitOutcome::NotReady("wallet cannot sign batches".into())),
            None => return Ok(SubmitOutcome::NotReady("wallet not connected".into())),
        };
        if packed.is_empty() {
            return Ok(SubmitOutcome::Submitted(Vec::new()));
        }

        logger.log_stage("sign", packed.len());
        let chain = &self.chain;
        let blockhash = self
            .fetch
            .schedule_rpc("latest_blockhash", move || chain.latest_blockhash())
            .await
            .map_err(SubmitError::Blockhash)?;

        let unsigned = packed
            .iter_mut()
            .map(|tx| tx.compile(&payer, blockhash))
            .collect::<Result<Vec<_>, _>>()?;
        let expected = unsigned.len();

        let signed = match self.wallet.sign_all_transactions(unsigned).await {
            Ok(signed) => signed,
            Err(WalletError::UserRejected) => {
                info!(context_id = %logger.context_id(), "User declined to sign, nothing submitted");
                self.metrics.actions_cancelled.inc();
                return Ok(SubmitOutcome::Cancelled);
            }
            Err(e) => return Err(e.into()),
        };
        if signed.len() != expected {
            return Err(SubmitError::SignatureCount {
                expected,
                got: signed.len(),
            });
        }

        logger.log_stage("submit", packed.len());
        let units = match self.config.mode {
            RelayMode::Bundle => self.submit_bundles(packed, signed, cancel, logger).await,
            RelayMode::Direct => self.submit_direct(packed, signed, cancel, logger).await,
        };
        Ok(SubmitOutcome::Submitted(units))
    }

    async fn submit_bundles(
        &self,
        packed: Vec<PackedTransaction>,
        signed: Vec<VersionedTransaction>,
        cancel: &watch::Receiver<bool>,
        logger: &StructuredLogger,
    ) -> Vec<SubmittedUnit> {
        let size = self.config.max_bundle_size.max(1);
        let chunks: Vec<(Vec<PackedTransaction>, Vec<VersionedTransaction>)> = packed
            .chunks(size)
            .zip(signed.chunks(size))
            .map(|(p, s)| (p.to_vec(), s.to_vec()))
            .collect();
        let total = chunks.len();

        let mut units = Vec::with_capacity(total);
        for (index, (transactions, txs)) in chunks.into_iter().enumerate() {
            let status = if *cancel.borrow() {
                UnitStatus::NotSent
            } else if transactions.iter().any(|tx| tx.is_stale(self.config.max_anchor_age())) {
                logger.log_submission_failure(index, "blockhash too old");
                UnitStatus::Stale
            } else {
                let relay = &self.relay;
                let txs = txs.as_slice();
                match self
                    .fetch
                    .schedule_api("send_bundle", move || relay.send_bundle(txs))
                    .await
                {
                    Ok(id) => {
                        logger.log_submission(index, &id, txs.len());
                        self.metrics.bundles_submitted.inc();
                        UnitStatus::Submitted(UnitId::Bundle(id))
                    }
                    Err(e) => {
                        logger.log_submission_failure(index, &e.to_string());
                        UnitStatus::Failed(e.to_string())
                    }
                }
            };
            let sent = matches!(status, UnitStatus::Submitted(_) | UnitStatus::Failed(_));
            units.push(SubmittedUnit {
                index,
                transactions,
                status,
            });
            if sent && index + 1 < total && !self.config.inter_bundle_delay().is_zero() {
                tokio::time::sleep(self.config.inter_bundle_delay()).await;
            }
        }
        units
    }

    async fn submit_direct(
        &self,
        packed: Vec<PackedTransaction>,
        signed: Vec<VersionedTransaction>,
        cancel: &watch::Receiver<bool>,
        logger: &StructuredLogger,
    ) -> Vec<SubmittedUnit> {
        let mut units = Vec::with_capacity(packed.len());
        for (index, (transaction, tx)) in packed.into_iter().zip(signed).enumerate() {
            let status = if *cancel.borrow() {
                UnitStatus::NotSent
            } else if transaction.is_stale(self.config.max_anchor_age()) {
                logger.log_submission_failure(index, "blockhash too old");
                UnitStatus::Stale
            } else {
                let chain = &self.chain;
                let tx = &tx;
                match self
                    .fetch
                    .schedule_rpc("send_transaction", move || chain.send_transaction(tx))
                    .await
                {
                    Ok(signature) => {
                        logger.log_submission(index, &signature.to_string(), 1);
                        self.metrics.transactions_sent.inc();
                        UnitStatus::Submitted(UnitId::Signature(signature))
                    }
                    Err(e) => {
                        logger.log_submission_failure(index, &e.to_string());
                        UnitStatus::Failed(e.to_string())
                    }
                }
            };
            debug!(index, status = ?status, "Direct submission");
            units.push(SubmittedUnit {
                index,
                transactions: vec![transaction],
                status,
            });
        }
        units
    }
}
