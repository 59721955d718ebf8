use async_trait::async_trait;
use serde_json::Value;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::request::TokenAccountsFilter;
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::TransactionConfirmationStatus;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChainRpc, ConfirmationLevel, SignatureState, TokenAccountEntry};
use crate::fetch::FetchError;

/// `ChainRpc` over a single JSON-RPC endpoint.
pub struct SolanaRpc {
    client: Arc<RpcClient>,
}

impl SolanaRpc {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            url.to_string(),
            timeout,
            CommitmentConfig::confirmed(),
        );
        Self {
            client: Arc::new(client),
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    async fn token_accounts_by_owner(&self, owner: &Pubkey) -> Result<Vec<TokenAccountEntry>, FetchError> {
        let accounts = self
            .client
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(spl_token::id()))
            .await
            .map_err(FetchError::from_client_error)?;

        let mut entries = Vec::with_capacity(accounts.len());
        for keyed in accounts {
            let address = Pubkey::from_str(&keyed.pubkey)
                .map_err(|e| FetchError::Decode(format!("token account {}: {e}", keyed.pubkey)))?;
            let UiAccountData::Json(parsed) = &keyed.account.data else {
                return Err(FetchError::Decode(format!(
                    "token account {address} not jsonParsed"
                )));
            };
            entries.push(parse_token_account(address, &parsed.parsed)?);
        }
        debug!(owner = %owner, count = entries.len(), "Enumerated token accounts");
        Ok(entries)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.client.commitment())
            .await
            .map_err(FetchError::from_client_error)?;
        Ok(response.value.map(|account| account.data))
    }

    async fn multiple_account_data(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, FetchError> {
        let accounts = self
            .client
            .get_multiple_accounts(addresses)
            .await
            .map_err(FetchError::from_client_error)?;
        Ok(accounts.into_iter().map(|a| a.map(|a| a.data)).collect())
    }

    async fn latest_blockhash(&self) -> Result<Hash, FetchError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(FetchError::from_client_error)
    }

    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature, FetchError> {
        self.client
            .send_transaction(tx)
            .await
            .map_err(FetchError::from_client_error)
    }

    async fn signature_statuses(&self, signatures: &[Signature]) -> Result<Vec<Option<SignatureState>>, FetchError> {
        let response = self
            .client
            .get_signature_statuses(signatures)
            .await
            .map_err(FetchError::from_client_error)?;
        Ok(response
            .value
            .into_iter()
            .map(|status| {
                status.map(|s| SignatureState {
                    confirmation: s.confirmation_status.map(|c| match c {
                        TransactionConfirmationStatus::Processed => ConfirmationLevel::Processed,
                        TransactionConfirmationStatus::Confirmed => ConfirmationLevel::Confirmed,
                        TransactionConfirmationStatus::Finalized => ConfirmationLevel::Finalized,
                    }),
                    err: s.err.map(|e| e.to_string()),
                })
            })
            .collect())
    }
}

/// Pull mint, raw amount and decimals out of a jsonParsed SPL token account.
pub(crate) fn parse_token_account(address: Pubkey, parsed: &Value) -> Result<TokenAccountEntry, FetchError> {
    let info = parsed
        .get("info")
        .ok_or_else(|| FetchError::Decode(format!("token account {address} missing info")))?;
    let mint = info
        .get("mint")
        .and_then(Value::as_str)
        .and_then(|s| Pubkey::from_str(s).ok())
        .ok_or_else(|| FetchError::Decode(format!("token account {address} missing mint")))?;
    let token_amount = info
        .get("tokenAmount")
        .ok_or_else(|| FetchError::Decode(format!("token account {address} missing tokenAmount")))?;
    let raw_amount = token_amount
        .get("amount")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| FetchError::Decode(format!("token account {address} bad amount")))?;
    let decimals = token_amount
        .get("decimals")
        .and_then(Value::as_u64)
        .and_then(|d| u8::try_from(d).ok())
        .ok_or_else(|| FetchError::Decode(format!("token account {address} bad decimals")))?;

    Ok(TokenAccountEntry {
        address,
        mint,
        raw_amount,
        decimals,
    })
}
