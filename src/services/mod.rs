//! External collaborators: swap aggregator, price, block-engine relay,
//! token metadata and off-chain content.
//!
//! Each concern is a trait so the pipeline can run against fakes; the
//! production implementations live in the submodules.

pub mod content;
pub mod jito;
pub mod jupiter;
pub mod metadata;

pub use content::HttpContent;
pub use jito::JitoClient;
pub use jupiter::JupiterClient;

use async_trait::async_trait;
use serde_json::Value;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, transaction::VersionedTransaction};
use std::sync::Arc;

use crate::fetch::FetchError;
use crate::rpc::{ChainRpc, ConfirmationLevel};

/// Every external collaborator the pipeline talks to.
#[derive(Clone)]
pub struct Services {
    pub chain: Arc<dyn ChainRpc>,
    pub aggregator: Arc<dyn Aggregator>,
    pub prices: Arc<dyn PriceSource>,
    pub relay: Arc<dyn Relay>,
    pub content: Arc<dyn ContentFetcher>,
    pub floor: Arc<dyn FloorPriceSource>,
}

/// Slippage mode for a quote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slippage {
    Fixed { bps: u16 },
    Auto { max_bps: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Smallest-unit input amount
    pub amount: u64,
    pub slippage: Slippage,
}

/// Aggregator quote. The raw JSON is handed back verbatim when requesting
/// the swap.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub raw: Value,
    pub in_amount: u64,
    pub out_amount: u64,
    pub route_hops: usize,
}

impl Quote {
    pub fn from_json(raw: Value) -> Result<Self, FetchError> {
        let amount = |field: &str| {
            raw.get(field)
                .and_then(|v| match v {
                    Value::String(s) => s.parse::<u64>().ok(),
                    Value::Number(n) => n.as_u64(),
                    _ => None,
                })
                .ok_or_else(|| FetchError::Decode(format!("quote missing {field}")))
        };
        let in_amount = amount("inAmount")?;
        let out_amount = amount("outAmount")?;
        let route_hops = raw
            .get("routePlan")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        Ok(Self {
            raw,
            in_amount,
            out_amount,
            route_hops,
        })
    }

    /// A usable route exists.
    pub fn has_route(&self) -> bool {
        self.route_hops > 0 && self.out_amount > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOptions {
    pub user: Pubkey,
    pub fee_account: Option<Pubkey>,
    pub wrap_and_unwrap_sol: bool,
    pub dynamic_compute_unit_limit: bool,
}

/// Which swap endpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPayloadMode {
    #[default]
    Instructions,
    PrebuiltTransaction,
}

/// Decoded swap instructions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SwapInstructionSet {
    pub compute_budget: Vec<Instruction>,
    pub setup: Vec<Instruction>,
    pub swap: Vec<Instruction>,
    pub cleanup: Vec<Instruction>,
    pub lookup_table_addresses: Vec<Pubkey>,
}

impl SwapInstructionSet {
    /// Setup, swap and cleanup in execution order, compute budget excluded.
    pub fn ordered(&self) -> Vec<Instruction> {
        self.setup
            .iter()
            .chain(self.swap.iter())
            .chain(self.cleanup.iter())
            .cloned()
            .collect()
    }
}

/// What the aggregator handed back for a swap.
#[derive(Debug, Clone)]
pub enum SwapPayload {
    Instructions(SwapInstructionSet),
    PrebuiltTransaction(VersionedTransaction),
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, FetchError>;

    async fn swap_payload(
        &self,
        quote: &Quote,
        options: &SwapOptions,
        mode: SwapPayloadMode,
    ) -> Result<SwapPayload, FetchError>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD unit price; `None` when the service has no price for the mint.
    async fn spot_usd(&self, mint: &Pubkey) -> Result<Option<f64>, FetchError>;
}

/// One entry of a relay bundle status response.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleStatusEntry {
    pub bundle_id: String,
    pub confirmation: Option<ConfirmationLevel>,
    /// Raw `err` field; success is encoded as `{"Ok": null}` by the relay.
    pub err: Option<Value>,
    pub slot: Option<u64>,
}

/// Relay view of a bundle that has not landed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflightStatus {
    Invalid,
    Pending,
    Failed,
    Landed,
}

#[async_trait]
pub trait Relay: Send + Sync {
    async fn tip_accounts(&self) -> Result<Vec<Pubkey>, FetchError>;

    /// Submit signed transactions as one atomic bundle; returns its id.
    async fn send_bundle(&self, txs: &[VersionedTransaction]) -> Result<String, FetchError>;

    async fn bundle_statuses(&self, ids: &[String]) -> Result<Vec<Option<BundleStatusEntry>>, FetchError>;

    async fn inflight_bundle_statuses(&self, ids: &[String]) -> Result<Vec<Option<InflightStatus>>, FetchError>;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Resolve the image URL advertised by an off-chain metadata URI.
    async fn image_for(&self, uri: &str) -> Result<Option<String>, FetchError>;
}

#[async_trait]
pub trait FloorPriceSource: Send + Sync {
    /// USD floor price of a collection (or single mint).
    async fn floor_usd(&self, collection: &Pubkey) -> Result<Option<f64>, FetchError>;
}

/// Decode a successful JSON response, mapping non-2xx statuses to
/// `FetchError::Http` / `FetchError::RateLimited` with the body attached.
pub(crate) async fn json_response<T: serde::de::DeserializeOwned>(
    service: &str,
    response: reqwest::Response,
) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::from_status(service, status.as_u16(), body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| FetchError::from_reqwest(service, e))
}
