//! Test Utilities Module
//!
//! In-memory stand-ins for the chain, the aggregator, the price and content
//! services, the relay and the wallet, plus a harness wiring them into the
//! pipeline. Every fake is scriptable and records the calls it received.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::fetch::{FetchConfig, FetchError, FetchLayer, LimiterConfig, RetryPolicy, PARTIAL_ROUTE_MARKER};
use crate::holdings::{Enricher, Holding, HoldingKind};
use crate::metrics::Metrics;
use crate::pipeline::LockInPipeline;
use crate::rpc::{ChainRpc, ConfirmationLevel, SignatureState, TokenAccountEntry};
use crate::services::metadata::{MetadataSource, TokenRegistry};
use crate::services::{
    Aggregator, BundleStatusEntry, ContentFetcher, FloorPriceSource, InflightStatus, PriceSource,
    Quote, QuoteRequest, Relay, Services, SwapInstructionSet, SwapOptions, SwapPayload,
    SwapPayloadMode,
};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{compile_unsigned, BuilderSettings, InstructionBuilder};
use crate::wallet::{WalletError, WalletSigner};

/// Program id carried by every fake swap instruction
pub const FAKE_SWAP_PROGRAM: Pubkey = Pubkey::new_from_array([7u8; 32]);

/// Fungible holding with a fresh token account and placeholder metadata.
pub fn holding(mint: Pubkey, raw_amount: u64, decimals: u8) -> Holding {
    Holding {
        mint,
        token_account: Pubkey::new_unique(),
        raw_amount,
        decimals,
        kind: HoldingKind::Fungible,
        name: "Test Token".to_string(),
        symbol: "TEST".to_string(),
        image: None,
        usd_value: 0.0,
        swappable: false,
        metadata_source: MetadataSource::Default,
        collection: None,
    }
}

/// Enumeration entry with a fresh token account.
pub fn token_entry(mint: Pubkey, raw_amount: u64, decimals: u8) -> TokenAccountEntry {
    TokenAccountEntry {
        address: Pubkey::new_unique(),
        mint,
        raw_amount,
        decimals,
    }
}

/// Cycle through a script, repeating its last element once exhausted.
fn scripted<T: Clone>(script: &[T], call: usize) -> Option<T> {
    script.get(call.min(script.len().saturating_sub(1))).cloned()
}

/// In-memory chain
#[derive(Default)]
pub struct FakeChain {
    token_accounts: Mutex<HashMap<Pubkey, Vec<TokenAccountEntry>>>,
    enumeration_error: Mutex<Option<FetchError>>,
    account_data: Mutex<HashMap<Pubkey, Vec<u8>>>,
    sent: Mutex<Vec<VersionedTransaction>>,
    failing_sends: Mutex<HashSet<usize>>,
    signature_script: Mutex<Vec<Option<SignatureState>>>,
    signature_calls: Mutex<HashMap<Signature, usize>>,
    blockhash_calls: AtomicUsize,
}

impl FakeChain {
    pub fn add_token_account(&self, owner: Pubkey, entry: TokenAccountEntry) {
        self.token_accounts.lock().entry(owner).or_default().push(entry);
    }

    pub fn fail_enumeration(&self, err: FetchError) {
        *self.enumeration_error.lock() = Some(err);
    }

    pub fn set_account_data(&self, address: Pubkey, data: Vec<u8>) {
        self.account_data.lock().insert(address, data);
    }

    /// Make the n-th `send_transaction` call (0-based) fail.
    pub fn fail_send_at(&self, index: usize) {
        self.failing_sends.lock().insert(index);
    }

    /// Statuses returned for every signature, one per poll.
    pub fn script_signature_statuses(&self, script: Vec<Option<SignatureState>>) {
        *self.signature_script.lock() = script;
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().clone()
    }

    pub fn blockhash_calls(&self) -> usize {
        self.blockhash_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn token_accounts_by_owner(&self, owner: &Pubkey) -> Result<Vec<TokenAccountEntry>, FetchError> {
        if let Some(err) = self.enumeration_error.lock().clone() {
            return Err(err);
        }
        Ok(self.token_accounts.lock().get(owner).cloned().unwrap_or_default())
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError> {
        Ok(self.account_data.lock().get(address).cloned())
    }

    async fn multiple_account_data(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, FetchError> {
        let data = self.account_data.lock();
        Ok(addresses.iter().map(|a| data.get(a).cloned()).collect())
    }

    async fn latest_blockhash(&self) -> Result<Hash, FetchError> {
        self.blockhash_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Hash::new_unique())
    }

    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature, FetchError> {
        let mut sent = self.sent.lock();
        let index = sent.len();
        sent.push(tx.clone());
        if self.failing_sends.lock().contains(&index) {
            return Err(FetchError::Rpc("Transaction simulation failed".into()));
        }
        tx.signatures
            .first()
            .copied()
            .ok_or_else(|| FetchError::Rpc("unsigned transaction".into()))
    }

    async fn signature_statuses(&self, signatures: &[Signature]) -> Result<Vec<Option<SignatureState>>, FetchError> {
        let script = self.signature_script.lock().clone();
        let mut calls = self.signature_calls.lock();
        Ok(signatures
            .iter()
            .map(|sig| {
                let call = calls.entry(*sig).or_default();
                let status = scripted(&script, *call).unwrap_or(Some(SignatureState {
                    confirmation: Some(ConfirmationLevel::Finalized),
                    err: None,
                }));
                *call += 1;
                status
            })
            .collect())
    }
}

/// Aggregator with per-mint routes, capacities and failures
pub struct FakeAggregator {
    routes: Mutex<HashMap<Pubkey, bool>>,
    capacities: Mutex<HashMap<Pubkey, u64>>,
    quote_failures: Mutex<HashMap<Pubkey, FetchError>>,
    transient_failures: Mutex<HashMap<Pubkey, (usize, FetchError)>>,
    swap_failures: Mutex<HashSet<Pubkey>>,
    swap_sizes: Mutex<HashMap<Pubkey, usize>>,
    quoted: Mutex<Vec<(Pubkey, u64)>>,
    prebuilt_payer: Mutex<Option<Pubkey>>,
    default_swap_size: usize,
}

impl Default for FakeAggregator {
    fn default() -> Self {
        Self {
            routes: Mutex::default(),
            capacities: Mutex::default(),
            quote_failures: Mutex::default(),
            transient_failures: Mutex::default(),
            swap_failures: Mutex::default(),
            swap_sizes: Mutex::default(),
            quoted: Mutex::default(),
            prebuilt_payer: Mutex::default(),
            default_swap_size: 64,
        }
    }
}

impl FakeAggregator {
    pub fn set_route(&self, mint: Pubkey, routable: bool) {
        self.routes.lock().insert(mint, routable);
    }

    /// Largest amount the route absorbs; larger quotes report a partial route.
    pub fn set_capacity(&self, mint: Pubkey, max_amount: u64) {
        self.capacities.lock().insert(mint, max_amount);
    }

    pub fn fail_quotes_for(&self, mint: Pubkey, err: FetchError) {
        self.quote_failures.lock().insert(mint, err);
    }

    /// Fail the next `times` quotes for `mint` with `err`, then behave normally.
    pub fn fail_quotes_times(&self, mint: Pubkey, times: usize, err: FetchError) {
        self.transient_failures.lock().insert(mint, (times, err));
    }

    pub fn fail_swaps_for(&self, mint: Pubkey) {
        self.swap_failures.lock().insert(mint);
    }

    /// Data length of the swap instruction built for `mint`.
    pub fn set_swap_size(&self, mint: Pubkey, bytes: usize) {
        self.swap_sizes.lock().insert(mint, bytes);
    }

    /// Fee payer of prebuilt swap transactions; the requesting user by default.
    pub fn set_prebuilt_payer(&self, payer: Pubkey) {
        *self.prebuilt_payer.lock() = Some(payer);
    }

    pub fn quote_calls(&self) -> usize {
        self.quoted.lock().len()
    }

    /// Amounts quoted for `mint`, in call order.
    pub fn quoted_amounts(&self, mint: &Pubkey) -> Vec<u64> {
        self.quoted
            .lock()
            .iter()
            .filter(|(m, _)| m == mint)
            .map(|(_, amount)| *amount)
            .collect()
    }
}

#[async_trait]
impl Aggregator for FakeAggregator {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, FetchError> {
        let mint = request.input_mint;
        self.quoted.lock().push((mint, request.amount));

        if let Some(err) = self.quote_failures.lock().get(&mint) {
            return Err(err.clone());
        }
        if let Some((remaining, err)) = self.transient_failures.lock().get_mut(&mint) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(err.clone());
            }
        }
        if let Some(capacity) = self.capacities.lock().get(&mint) {
            if request.amount > *capacity {
                return Err(FetchError::Http {
                    service: "jupiter".into(),
                    status: 400,
                    body: json!({ "errorCode": PARTIAL_ROUTE_MARKER }).to_string(),
                });
            }
        }
        let routable = self.routes.lock().get(&mint).copied().unwrap_or(false);
        let route_plan = if routable { json!([{ "percent": 100 }]) } else { json!([]) };
        let out_amount = if routable { request.amount } else { 0 };
        Quote::from_json(json!({
            "inputMint": mint.to_string(),
            "outputMint": request.output_mint.to_string(),
            "inAmount": request.amount.to_string(),
            "outAmount": out_amount.to_string(),
            "routePlan": route_plan,
        }))
    }

    async fn swap_payload(
        &self,
        quote: &Quote,
        options: &SwapOptions,
        mode: SwapPayloadMode,
    ) -> Result<SwapPayload, FetchError> {
        let mint = quote
            .raw
            .get("inputMint")
            .and_then(Value::as_str)
            .and_then(|s| Pubkey::from_str(s).ok())
            .ok_or_else(|| FetchError::Decode("quote without inputMint".into()))?;
        if self.swap_failures.lock().contains(&mint) {
            return Err(FetchError::Http {
                service: "jupiter".into(),
                status: 422,
                body: "swap instructions unavailable".into(),
            });
        }
        let size = self
            .swap_sizes
            .lock()
            .get(&mint)
            .copied()
            .unwrap_or(self.default_swap_size);

        let swap = Instruction::new_with_bytes(
            FAKE_SWAP_PROGRAM,
            &vec![1u8; size],
            vec![
                AccountMeta::new(options.user, true),
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new(Pubkey::new_unique(), false),
                AccountMeta::new_readonly(mint, false),
            ],
        );
        let compute_budget = ComputeBudgetInstruction::set_compute_unit_limit(300_000);
        if mode == SwapPayloadMode::PrebuiltTransaction {
            let payer = self.prebuilt_payer.lock().unwrap_or(options.user);
            let tx = compile_unsigned(&payer, &[compute_budget, swap], &[], Hash::new_unique())
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            return Ok(SwapPayload::PrebuiltTransaction(tx));
        }
        Ok(SwapPayload::Instructions(SwapInstructionSet {
            compute_budget: vec![compute_budget],
            setup: vec![],
            swap: vec![swap],
            cleanup: vec![],
            lookup_table_addresses: vec![],
        }))
    }
}

#[derive(Default)]
pub struct FakePrices {
    prices: Mutex<HashMap<Pubkey, f64>>,
    failures: Mutex<HashSet<Pubkey>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakePrices {
    /// Hold every lookup open for `latency` so overlapping calls show up.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Most lookups seen running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_price(&self, mint: Pubkey, usd: f64) {
        self.prices.lock().insert(mint, usd);
    }

    pub fn fail_price_for(&self, mint: Pubkey) {
        self.failures.lock().insert(mint);
    }
}

#[async_trait]
impl PriceSource for FakePrices {
    async fn spot_usd(&self, mint: &Pubkey) -> Result<Option<f64>, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failures.lock().contains(mint) {
            return Err(FetchError::Transport {
                service: "price".into(),
                message: "connection reset".into(),
            });
        }
        Ok(self.prices.lock().get(mint).copied())
    }
}

/// Off-chain metadata images and collection floors
#[derive(Default)]
pub struct FakeContent {
    images: Mutex<HashMap<String, String>>,
    floors: Mutex<HashMap<Pubkey, f64>>,
}

impl FakeContent {
    pub fn set_image(&self, uri: &str, image: &str) {
        self.images.lock().insert(uri.to_string(), image.to_string());
    }

    pub fn set_floor(&self, collection: Pubkey, usd: f64) {
        self.floors.lock().insert(collection, usd);
    }
}

#[async_trait]
impl ContentFetcher for FakeContent {
    async fn image_for(&self, uri: &str) -> Result<Option<String>, FetchError> {
        Ok(self.images.lock().get(uri).cloned())
    }
}

#[async_trait]
impl FloorPriceSource for FakeContent {
    async fn floor_usd(&self, collection: &Pubkey) -> Result<Option<f64>, FetchError> {
        Ok(self.floors.lock().get(collection).copied())
    }
}

fn push_borsh_string(buf: &mut Vec<u8>, s: &str, pad_to: usize) {
    let mut bytes = s.as_bytes().to_vec();
    bytes.resize(pad_to.max(bytes.len()), 0);
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(&bytes);
}

/// Raw MetadataV1 account bytes with the fixed-width padding the token
/// metadata program writes.
pub fn metadata_account(
    mint: &Pubkey,
    name: &str,
    symbol: &str,
    uri: &str,
    token_standard: Option<u8>,
    collection: Option<Pubkey>,
) -> Vec<u8> {
    let mut buf = vec![4u8];
    buf.extend_from_slice(Pubkey::new_unique().as_ref());
    buf.extend_from_slice(mint.as_ref());
    push_borsh_string(&mut buf, name, 32);
    push_borsh_string(&mut buf, symbol, 10);
    push_borsh_string(&mut buf, uri, 200);
    buf.extend_from_slice(&500u16.to_le_bytes());
    buf.push(1); // creators
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(Pubkey::new_unique().as_ref());
    buf.extend_from_slice(&[1, 100]);
    buf.extend_from_slice(&[0, 1]); // primary sale, mutable
    buf.extend_from_slice(&[1, 255]); // edition nonce
    match token_standard {
        Some(s) => buf.extend_from_slice(&[1, s]),
        None => buf.push(0),
    }
    match collection {
        Some(key) => {
            buf.extend_from_slice(&[1, 1]);
            buf.extend_from_slice(key.as_ref());
        }
        None => buf.push(0),
    }
    buf.resize(679, 0);
    buf
}

/// Bundle status the relay reports on one poll
#[derive(Debug, Clone)]
pub enum ScriptedBundle {
    /// Not visible on the status endpoint; the in-flight endpoint is asked
    Unknown,
    Status {
        confirmation: ConfirmationLevel,
        err: Option<Value>,
    },
}

/// Block-engine relay
pub struct FakeRelay {
    tip_accounts: Vec<Pubkey>,
    bundles: Mutex<Vec<Vec<VersionedTransaction>>>,
    failing_bundles: Mutex<HashSet<usize>>,
    status_script: Mutex<Vec<ScriptedBundle>>,
    inflight_script: Mutex<Vec<Option<InflightStatus>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    inflight_calls: Mutex<HashMap<String, usize>>,
    throttled: AtomicBool,
}

impl Default for FakeRelay {
    fn default() -> Self {
        Self {
            tip_accounts: vec![Pubkey::new_unique(), Pubkey::new_unique()],
            bundles: Mutex::default(),
            failing_bundles: Mutex::default(),
            status_script: Mutex::default(),
            inflight_script: Mutex::default(),
            status_calls: Mutex::default(),
            inflight_calls: Mutex::default(),
            throttled: AtomicBool::new(false),
        }
    }
}

impl FakeRelay {
    pub fn tip_account_keys(&self) -> &[Pubkey] {
        &self.tip_accounts
    }

    /// Make the n-th `send_bundle` call (0-based) fail.
    pub fn fail_bundle_at(&self, index: usize) {
        self.failing_bundles.lock().insert(index);
    }

    /// Statuses returned for every bundle, one per poll. An empty script
    /// reports every bundle finalized.
    pub fn script_statuses(&self, script: Vec<ScriptedBundle>) {
        *self.status_script.lock() = script;
    }

    /// Answer every status query with HTTP 429.
    pub fn throttle_statuses(&self) {
        self.throttled.store(true, Ordering::SeqCst);
    }

    pub fn script_inflight(&self, script: Vec<Option<InflightStatus>>) {
        *self.inflight_script.lock() = script;
    }

    pub fn bundles(&self) -> Vec<Vec<VersionedTransaction>> {
        self.bundles.lock().clone()
    }

    pub fn status_calls(&self, bundle_id: &str) -> usize {
        self.status_calls.lock().get(bundle_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn tip_accounts(&self) -> Result<Vec<Pubkey>, FetchError> {
        Ok(self.tip_accounts.clone())
    }

    async fn send_bundle(&self, txs: &[VersionedTransaction]) -> Result<String, FetchError> {
        let mut bundles = self.bundles.lock();
        let index = bundles.len();
        bundles.push(txs.to_vec());
        if self.failing_bundles.lock().contains(&index) {
            return Err(FetchError::Rpc("bundle simulation failed".into()));
        }
        Ok(format!("bundle-{index}"))
    }

    async fn bundle_statuses(&self, ids: &[String]) -> Result<Vec<Option<BundleStatusEntry>>, FetchError> {
        let script = self.status_script.lock().clone();
        let mut calls = self.status_calls.lock();
        if self.throttled.load(Ordering::SeqCst) {
            for id in ids {
                *calls.entry(id.clone()).or_default() += 1;
            }
            return Err(FetchError::from_status("jito", 429, "rate limited".into()));
        }
        Ok(ids
            .iter()
            .map(|id| {
                let call = calls.entry(id.clone()).or_default();
                let step = scripted(&script, *call).unwrap_or(ScriptedBundle::Status {
                    confirmation: ConfirmationLevel::Finalized,
                    err: Some(json!({ "Ok": null })),
                });
                *call += 1;
                match step {
                    ScriptedBundle::Unknown => None,
                    ScriptedBundle::Status { confirmation, err } => Some(BundleStatusEntry {
                        bundle_id: id.clone(),
                        confirmation: Some(confirmation),
                        err,
                        slot: Some(1),
                    }),
                }
            })
            .collect())
    }

    async fn inflight_bundle_statuses(&self, ids: &[String]) -> Result<Vec<Option<InflightStatus>>, FetchError> {
        if self.throttled.load(Ordering::SeqCst) {
            return Err(FetchError::from_status("jito", 429, "rate limited".into()));
        }
        let script = self.inflight_script.lock().clone();
        let mut calls = self.inflight_calls.lock();
        Ok(ids
            .iter()
            .map(|id| {
                let call = calls.entry(id.clone()).or_default();
                let status = scripted(&script, *call).flatten();
                *call += 1;
                status
            })
            .collect())
    }
}

/// Keypair-backed wallet with switchable readiness and rejection
pub struct FakeWallet {
    keypair: Keypair,
    connected: AtomicBool,
    batch_capable: AtomicBool,
    reject: AtomicBool,
    sign_calls: AtomicUsize,
}

impl Default for FakeWallet {
    fn default() -> Self {
        Self {
            keypair: Keypair::new(),
            connected: AtomicBool::new(true),
            batch_capable: AtomicBool::new(true),
            reject: AtomicBool::new(false),
            sign_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeWallet {
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn disable_batch_signing(&self) {
        self.batch_capable.store(false, Ordering::SeqCst);
    }

    /// Decline the next signing prompts.
    pub fn reject_signing(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletSigner for FakeWallet {
    fn public_key(&self) -> Option<Pubkey> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.keypair.pubkey())
    }

    fn can_sign_all(&self) -> bool {
        self.batch_capable.load(Ordering::SeqCst)
    }

    async fn sign_all_transactions(
        &self,
        txs: Vec<VersionedTransaction>,
    ) -> Result<Vec<VersionedTransaction>, WalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(WalletError::UserRejected);
        }
        txs.into_iter()
            .map(|tx| {
                VersionedTransaction::try_new(tx.message, &[&self.keypair])
                    .map_err(|e| WalletError::Signing(e.to_string()))
            })
            .collect()
    }
}

/// Fakes wired together with a fetch layer that never paces.
pub struct TestHarness {
    pub owner: Pubkey,
    pub target_mint: Pubkey,
    pub chain: Arc<FakeChain>,
    pub aggregator: Arc<FakeAggregator>,
    pub prices: Arc<FakePrices>,
    pub relay: Arc<FakeRelay>,
    pub content: Arc<FakeContent>,
    pub wallet: Arc<FakeWallet>,
    pub metrics: Arc<Metrics>,
    pub fetch: Arc<FetchLayer>,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let wallet = Arc::new(FakeWallet::default());
        let target_mint = Pubkey::new_unique();
        let metrics = Arc::new(Metrics::new().unwrap());

        let mut config = Config::default();
        config.swap.target_mint = target_mint.to_string();
        config.fetch = FetchConfig {
            rpc: LimiterConfig::new(5, Duration::ZERO),
            api: LimiterConfig::new(3, Duration::ZERO),
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
            token_retry_attempts: 2,
            token_retry_delay_ms: 10,
        };
        let fetch = Arc::new(FetchLayer::new(&config.fetch, metrics.clone()));

        Self {
            owner: wallet.pubkey(),
            target_mint,
            chain: Arc::new(FakeChain::default()),
            aggregator: Arc::new(FakeAggregator::default()),
            prices: Arc::new(FakePrices::default()),
            relay: Arc::new(FakeRelay::default()),
            content: Arc::new(FakeContent::default()),
            wallet,
            metrics,
            fetch,
            config,
        }
    }

    /// Swap in a different fetch configuration, rebuilding the fetch layer.
    pub fn with_fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.fetch = Arc::new(FetchLayer::new(&fetch, self.metrics.clone()));
        self.config.fetch = fetch;
        self
    }

    pub fn services(&self) -> Services {
        Services {
            chain: self.chain.clone(),
            aggregator: self.aggregator.clone(),
            prices: self.prices.clone(),
            relay: self.relay.clone(),
            content: self.content.clone(),
            floor: self.content.clone(),
        }
    }

    pub fn logger(&self) -> StructuredLogger {
        StructuredLogger::new("test".to_string())
    }

    pub fn enricher(&self) -> Enricher {
        Enricher::new(
            self.services(),
            self.fetch.clone(),
            Arc::new(TokenRegistry::with_defaults()),
            self.metrics.clone(),
            self.target_mint,
            self.config.swap.probe_slippage_bps,
            self.config.enrich.concurrency,
        )
    }

    pub fn builder(&self) -> InstructionBuilder {
        let settings = BuilderSettings::from_config(self.owner, &self.config.swap).unwrap();
        InstructionBuilder::new(self.services(), self.fetch.clone(), self.metrics.clone(), settings)
    }

    pub fn pipeline(&self) -> LockInPipeline {
        LockInPipeline::new(
            self.services(),
            self.wallet.clone(),
            self.fetch.clone(),
            self.metrics.clone(),
            self.config.clone(),
        )
        .unwrap()
    }

    /// A routable holding of the wallet, priced at $1.
    pub fn routable_holding(&self, raw_amount: u64) -> Holding {
        let mut h = holding(Pubkey::new_unique(), raw_amount, 6);
        h.swappable = true;
        self.aggregator.set_route(h.mint, true);
        self.prices.set_price(h.mint, 1.0);
        h
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
