//! Jito block-engine JSON-RPC client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{json_response, BundleStatusEntry, InflightStatus, Relay};
use crate::fetch::FetchError;
use crate::rpc::ConfirmationLevel;

const SERVICE: &str = "jito";

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusValue {
    bundle_id: String,
    #[serde(default)]
    confirmation_status: Option<String>,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    slot: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InflightValue {
    bundle_id: String,
    status: String,
}

#[derive(Debug, Clone)]
pub struct JitoClient {
    http: reqwest::Client,
    base_url: String,
}

impl JitoClient {
    /// `base_url` is the block engine API root, e.g.
    /// `https://mainnet.block-engine.jito.wtf/api/v1`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, path: &str, method: &str, params: Value) -> Result<Value, FetchError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .json(&payload)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        let envelope: RpcEnvelope = json_response(SERVICE, response).await?;
        if let Some(err) = envelope.error {
            return Err(FetchError::Rpc(format!("{method} ({}): {}", err.code, err.message)));
        }
        envelope
            .result
            .ok_or_else(|| FetchError::Decode(format!("{method}: missing result")))
    }

    /// The status endpoints wrap results in `{context, value}`.
    fn value_array(result: Value, method: &str) -> Result<Vec<Value>, FetchError> {
        match result.get("value") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(FetchError::Decode(format!("{method}: unexpected value {other}"))),
        }
    }
}

#[async_trait]
impl Relay for JitoClient {
    async fn tip_accounts(&self) -> Result<Vec<Pubkey>, FetchError> {
        let result = self.call("bundles", "getTipAccounts", json!([])).await?;
        let accounts: Vec<String> = serde_json::from_value(result)
            .map_err(|e| FetchError::Decode(format!("getTipAccounts: {e}")))?;
        accounts
            .iter()
            .map(|s| {
                Pubkey::from_str(s).map_err(|e| FetchError::Decode(format!("tip account '{s}': {e}")))
            })
            .collect()
    }

    async fn send_bundle(&self, txs: &[VersionedTransaction]) -> Result<String, FetchError> {
        let encoded = txs
            .iter()
            .map(|tx| {
                bincode::serialize(tx)
                    .map(|bytes| bs58::encode(bytes).into_string())
                    .map_err(|e| FetchError::Decode(format!("serialize bundle tx: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(tx_count = encoded.len(), "Sending bundle");
        let result = self.call("bundles", "sendBundle", json!([encoded])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FetchError::Decode(format!("sendBundle: unexpected result {result}")))
    }

    async fn bundle_statuses(&self, ids: &[String]) -> Result<Vec<Option<BundleStatusEntry>>, FetchError> {
        let result = self.call("bundles", "getBundleStatuses", json!([ids])).await?;
        let entries = Self::value_array(result, "getBundleStatuses")?
            .into_iter()
            .filter(|v| !v.is_null())
            .map(|v| {
                serde_json::from_value::<StatusValue>(v)
                    .map_err(|e| FetchError::Decode(format!("getBundleStatuses: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids
            .iter()
            .map(|id| {
                entries.iter().find(|e| &e.bundle_id == id).map(|e| BundleStatusEntry {
                    bundle_id: e.bundle_id.clone(),
                    confirmation: e.confirmation_status.as_deref().and_then(ConfirmationLevel::parse),
                    err: e.err.clone(),
                    slot: e.slot,
                })
            })
            .collect())
    }

    async fn inflight_bundle_statuses(&self, ids: &[String]) -> Result<Vec<Option<InflightStatus>>, FetchError> {
        let result = self
            .call("getInflightBundleStatuses", "getInflightBundleStatuses", json!([ids]))
            .await?;
        let entries = Self::value_array(result, "getInflightBundleStatuses")?
            .into_iter()
            .filter(|v| !v.is_null())
            .map(|v| {
                serde_json::from_value::<InflightValue>(v)
                    .map_err(|e| FetchError::Decode(format!("getInflightBundleStatuses: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids
            .iter()
            .map(|id| {
                entries
                    .iter()
                    .find(|e| &e.bundle_id == id)
                    .and_then(|e| match e.status.as_str() {
                        "Invalid" => Some(InflightStatus::Invalid),
                        "Pending" => Some(InflightStatus::Pending),
                        "Failed" => Some(InflightStatus::Failed),
                        "Landed" => Some(InflightStatus::Landed),
                        _ => None,
                    })
            })
            .collect())
    }
}
