//! Jupiter v6 aggregator and price API client.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_ENGINE, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{
    json_response, Aggregator, PriceSource, Quote, QuoteRequest, Slippage, SwapInstructionSet,
    SwapOptions, SwapPayload, SwapPayloadMode,
};
use crate::fetch::FetchError;

const SERVICE: &str = "jupiter";

#[derive(Debug, Serialize)]
struct SwapRequest<'a> {
    #[serde(rename = "quoteResponse")]
    quote_response: &'a Value,
    #[serde(rename = "userPublicKey")]
    user_public_key: String,
    #[serde(rename = "wrapAndUnwrapSol")]
    wrap_and_unwrap_sol: bool,
    #[serde(rename = "dynamicComputeUnitLimit")]
    dynamic_compute_unit_limit: bool,
    #[serde(rename = "feeAccount", skip_serializing_if = "Option::is_none")]
    fee_account: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction")]
    swap_transaction: String,
}

#[derive(Debug, Deserialize)]
struct SwapInstructionsResponse {
    #[serde(rename = "tokenLedgerInstruction", default)]
    token_ledger_instruction: Option<JupiterInstruction>,
    #[serde(rename = "computeBudgetInstructions", default)]
    compute_budget_instructions: Vec<JupiterInstruction>,
    #[serde(rename = "setupInstructions", default)]
    setup_instructions: Vec<JupiterInstruction>,
    #[serde(rename = "swapInstruction")]
    swap_instruction: JupiterInstruction,
    #[serde(rename = "cleanupInstruction", default)]
    cleanup_instruction: Option<JupiterInstruction>,
    #[serde(rename = "otherInstructions", default)]
    other_instructions: Vec<JupiterInstruction>,
    #[serde(rename = "addressLookupTableAddresses", default)]
    address_lookup_table_addresses: Vec<String>,
}

/// Raw instruction as returned by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterInstruction {
    #[serde(rename = "programId")]
    pub program_id: String,
    pub accounts: Vec<JupiterAccountMeta>,
    /// base64
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterAccountMeta {
    pub pubkey: String,
    #[serde(rename = "isSigner")]
    pub is_signer: bool,
    #[serde(rename = "isWritable")]
    pub is_writable: bool,
}

impl JupiterInstruction {
    pub fn to_instruction(&self) -> Result<Instruction, FetchError> {
        let program_id = parse_pubkey(&self.program_id)?;
        let accounts = self
            .accounts
            .iter()
            .map(|acc| {
                Ok(AccountMeta {
                    pubkey: parse_pubkey(&acc.pubkey)?,
                    is_signer: acc.is_signer,
                    is_writable: acc.is_writable,
                })
            })
            .collect::<Result<Vec<_>, FetchError>>()?;
        let data = BASE64_ENGINE
            .decode(&self.data)
            .map_err(|e| FetchError::Decode(format!("instruction data (base64): {e}")))?;
        Ok(Instruction {
            program_id,
            accounts,
            data,
        })
    }
}

fn parse_pubkey(s: &str) -> Result<Pubkey, FetchError> {
    Pubkey::from_str(s).map_err(|e| FetchError::Decode(format!("invalid pubkey '{s}': {e}")))
}

fn convert_all(ixs: &[JupiterInstruction]) -> Result<Vec<Instruction>, FetchError> {
    ixs.iter().map(JupiterInstruction::to_instruction).collect()
}

/// HTTP client for the quote, swap, swap-instructions and price endpoints.
#[derive(Debug, Clone)]
pub struct JupiterClient {
    http: reqwest::Client,
    swap_api: String,
    price_api: String,
    platform_fee_bps: Option<u16>,
    max_accounts: Option<u16>,
}

impl JupiterClient {
    pub fn new(swap_api: &str, price_api: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            http,
            swap_api: swap_api.trim_end_matches('/').to_string(),
            price_api: price_api.trim_end_matches('/').to_string(),
            platform_fee_bps: None,
            max_accounts: None,
        })
    }

    pub fn with_platform_fee_bps(mut self, bps: Option<u16>) -> Self {
        self.platform_fee_bps = bps;
        self
    }

    pub fn with_max_accounts(mut self, max_accounts: Option<u16>) -> Self {
        self.max_accounts = max_accounts;
        self
    }

    fn quote_params(&self, request: &QuoteRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("inputMint", request.input_mint.to_string()),
            ("outputMint", request.output_mint.to_string()),
            ("amount", request.amount.to_string()),
        ];
        match request.slippage {
            Slippage::Fixed { bps } => params.push(("slippageBps", bps.to_string())),
            Slippage::Auto { max_bps } => {
                params.push(("autoSlippage", "true".to_string()));
                params.push(("maxAutoSlippageBps", max_bps.to_string()));
            }
        }
        if let Some(bps) = self.platform_fee_bps {
            params.push(("platformFeeBps", bps.to_string()));
        }
        if let Some(max) = self.max_accounts {
            params.push(("maxAccounts", max.to_string()));
        }
        params
    }

    async fn fetch_swap_instructions(&self, body: &SwapRequest<'_>) -> Result<SwapInstructionSet, FetchError> {
        let response = self
            .http
            .post(format!("{}/swap-instructions", self.swap_api))
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        let raw: Value = json_response(SERVICE, response).await?;
        if let Some(err) = raw.get("error").and_then(Value::as_str) {
            return Err(FetchError::Rpc(err.to_string()));
        }
        let parsed: SwapInstructionsResponse = serde_json::from_value(raw)
            .map_err(|e| FetchError::Decode(format!("swap-instructions: {e}")))?;

        let mut setup = Vec::new();
        if let Some(ledger) = &parsed.token_ledger_instruction {
            setup.push(ledger.to_instruction()?);
        }
        setup.extend(convert_all(&parsed.setup_instructions)?);

        let mut swap = convert_all(&parsed.other_instructions)?;
        swap.push(parsed.swap_instruction.to_instruction()?);

        Ok(SwapInstructionSet {
            compute_budget: convert_all(&parsed.compute_budget_instructions)?,
            setup,
            swap,
            cleanup: parsed
                .cleanup_instruction
                .as_ref()
                .map(JupiterInstruction::to_instruction)
                .transpose()?
                .into_iter()
                .collect(),
            lookup_table_addresses: parsed
                .address_lookup_table_addresses
                .iter()
                .map(|s| parse_pubkey(s))
                .collect::<Result<_, _>>()?,
        })
    }

    async fn fetch_swap_transaction(&self, body: &SwapRequest<'_>) -> Result<VersionedTransaction, FetchError> {
        let response = self
            .http
            .post(format!("{}/swap", self.swap_api))
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        let parsed: SwapResponse = json_response(SERVICE, response).await?;
        let bytes = BASE64_ENGINE
            .decode(&parsed.swap_transaction)
            .map_err(|e| FetchError::Decode(format!("swapTransaction (base64): {e}")))?;
        bincode::deserialize(&bytes)
            .map_err(|e| FetchError::Decode(format!("swapTransaction (bincode): {e}")))
    }
}

#[async_trait]
impl Aggregator for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, FetchError> {
        debug!(
            input_mint = %request.input_mint,
            output_mint = %request.output_mint,
            amount = request.amount,
            "Requesting quote"
        );
        let response = self
            .http
            .get(format!("{}/quote", self.swap_api))
            .query(&self.quote_params(request))
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        let raw: Value = json_response(SERVICE, response).await?;
        if let Some(err) = raw.get("error").and_then(Value::as_str) {
            return Err(FetchError::Rpc(err.to_string()));
        }
        Quote::from_json(raw)
    }

    async fn swap_payload(
        &self,
        quote: &Quote,
        options: &SwapOptions,
        mode: SwapPayloadMode,
    ) -> Result<SwapPayload, FetchError> {
        let body = SwapRequest {
            quote_response: &quote.raw,
            user_public_key: options.user.to_string(),
            wrap_and_unwrap_sol: options.wrap_and_unwrap_sol,
            dynamic_compute_unit_limit: options.dynamic_compute_unit_limit,
            fee_account: options.fee_account.map(|k| k.to_string()),
        };
        match mode {
            SwapPayloadMode::Instructions => self
                .fetch_swap_instructions(&body)
                .await
                .map(SwapPayload::Instructions),
            SwapPayloadMode::PrebuiltTransaction => self
                .fetch_swap_transaction(&body)
                .await
                .map(SwapPayload::PrebuiltTransaction),
        }
    }
}

#[async_trait]
impl PriceSource for JupiterClient {
    async fn spot_usd(&self, mint: &Pubkey) -> Result<Option<f64>, FetchError> {
        let response = self
            .http
            .get(&self.price_api)
            .query(&[("ids", mint.to_string())])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(SERVICE, e))?;
        let raw: Value = json_response(SERVICE, response).await?;
        Ok(parse_price(&raw, mint))
    }
}

/// `{"data": {"<mint>": {"price": "1.23"}}}`; a missing or null entry means
/// no price.
pub(crate) fn parse_price(raw: &Value, mint: &Pubkey) -> Option<f64> {
    let price = raw.get("data")?.get(mint.to_string())?.get("price")?;
    match price {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .filter(|p| p.is_finite() && *p >= 0.0)
}
