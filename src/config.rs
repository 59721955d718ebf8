//! Configuration for the lock-in sweeper
//!
//! Loaded from a TOML file with per-field defaults, a `.env` file and a
//! handful of environment overrides.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

use crate::fetch::FetchConfig;
use crate::services::metadata::RegistryEntry;
use crate::services::SwapPayloadMode;

/// Largest serialized transaction the network accepts.
pub const PACKET_DATA_SIZE: usize = 1232;

/// Block engine bundle size limit.
pub const MAX_BUNDLE_SIZE: usize = 5;

/// Target token of the lock-in.
pub const LOCKIN_MINT: &str = "8Ki8DpuWNxu9VsS3kQbarsCWMcFGWkzzA8pUPto9zBd5";

/// Jupiter referral program.
pub const REFERRAL_PROGRAM: &str = "REFER4ZgmyYx9c6He5XfaTMiGfdLwRnkV4RPp9t9iF3";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    /// Third-party service locations
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Limiters and retry policy
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub swap: SwapConfig,

    #[serde(default)]
    pub packing: PackingConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub enrich: EnrichConfig,

    /// Extra well-known mints for the metadata fallback
    #[serde(default)]
    pub registry: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_jupiter_swap_api")]
    pub jupiter_swap_api: String,

    #[serde(default = "default_jupiter_price_api")]
    pub jupiter_price_api: String,

    #[serde(default = "default_jito_block_engine")]
    pub jito_block_engine: String,

    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,

    /// NFT floor price service, queried as `{url}?ca={mint}`
    #[serde(default)]
    pub floor_price_url: Option<String>,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    #[serde(default = "default_target_mint")]
    pub target_mint: String,

    /// Upper bound for automatic slippage (basis points)
    #[serde(default = "default_max_auto_slippage")]
    pub max_auto_slippage_bps: u16,

    /// Fixed slippage of the swappability probe (basis points)
    #[serde(default = "default_probe_slippage")]
    pub probe_slippage_bps: u16,

    #[serde(default = "default_platform_fee")]
    pub platform_fee_bps: u16,

    /// Referral account receiving the platform fee
    #[serde(default)]
    pub referral_account: Option<String>,

    #[serde(default = "default_referral_program")]
    pub referral_program: String,

    /// Amount reduction per partial-route retry (percent)
    #[serde(default = "default_shrink_percent")]
    pub shrink_percent: u8,

    /// Total quotes attempted for one holding
    #[serde(default = "default_shrink_attempts")]
    pub shrink_attempts: u32,

    #[serde(default)]
    pub payload_mode: SwapPayloadMode,

    /// Close the token account after a full-balance swap
    #[serde(default = "default_true")]
    pub close_after_swap: bool,

    #[serde(default = "default_true")]
    pub wrap_and_unwrap_sol: bool,

    #[serde(default = "default_true")]
    pub dynamic_compute_unit_limit: bool,

    /// Route account limit passed to the aggregator
    #[serde(default)]
    pub max_accounts: Option<u16>,

    #[serde(default = "default_builder_concurrency")]
    pub builder_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingConfig {
    #[serde(default = "default_max_tx_bytes")]
    pub max_tx_bytes: usize,

    /// Bytes kept free below `max_tx_bytes`
    #[serde(default = "default_headroom")]
    pub headroom_bytes: usize,

    /// Distinct accounts (static + loaded) per transaction
    #[serde(default = "default_max_accounts")]
    pub max_accounts: usize,

    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,

    /// Micro-lamports per compute unit
    #[serde(default = "default_compute_unit_price")]
    pub compute_unit_price: u64,
}

/// How signed transactions reach the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    #[default]
    Bundle,
    Direct,
}

impl FromStr for RelayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bundle" => Ok(Self::Bundle),
            "direct" => Ok(Self::Direct),
            other => bail!("unknown relay mode '{other}' (expected bundle or direct)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub mode: RelayMode,

    /// Tip per transaction in bundle mode
    #[serde(default = "default_tip")]
    pub tip_lamports: u64,

    #[serde(default = "default_bundle_size")]
    pub max_bundle_size: usize,

    #[serde(default = "default_inter_bundle_delay")]
    pub inter_bundle_delay_ms: u64,

    /// Blockhash age after which a signed transaction is not submitted
    #[serde(default = "default_max_anchor_age")]
    pub max_anchor_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    /// Consecutive `Invalid` in-flight reports before a bundle counts as dropped
    #[serde(default = "default_invalid_grace")]
    pub invalid_grace_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    #[serde(default = "default_enrich_concurrency")]
    pub concurrency: usize,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }
fn default_jupiter_swap_api() -> String { "https://quote-api.jup.ag/v6".to_string() }
fn default_jupiter_price_api() -> String { "https://api.jup.ag/price/v2".to_string() }
fn default_jito_block_engine() -> String { "https://mainnet.block-engine.jito.wtf/api/v1".to_string() }
fn default_ipfs_gateway() -> String { "https://cf-ipfs.com/ipfs".to_string() }
fn default_http_timeout() -> u64 { 15 }
fn default_target_mint() -> String { LOCKIN_MINT.to_string() }
fn default_max_auto_slippage() -> u16 { 1_000 }
fn default_probe_slippage() -> u16 { 50 }
fn default_platform_fee() -> u16 { 150 }
fn default_referral_program() -> String { REFERRAL_PROGRAM.to_string() }
fn default_shrink_percent() -> u8 { 5 }
fn default_shrink_attempts() -> u32 { 3 }
fn default_builder_concurrency() -> usize { 3 }
fn default_max_tx_bytes() -> usize { PACKET_DATA_SIZE }
fn default_headroom() -> usize { 32 }
fn default_max_accounts() -> usize { 64 }
fn default_compute_unit_limit() -> u32 { 200_000 }
fn default_compute_unit_price() -> u64 { 1 }
fn default_tip() -> u64 { 10_000 }
fn default_bundle_size() -> usize { MAX_BUNDLE_SIZE }
fn default_inter_bundle_delay() -> u64 { 500 }
fn default_max_anchor_age() -> u64 { 60 }
fn default_poll_interval() -> u64 { 2_000 }
fn default_poll_attempts() -> u32 { 30 }
fn default_invalid_grace() -> u32 { 3 }
fn default_enrich_concurrency() -> usize { 8 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            jupiter_swap_api: default_jupiter_swap_api(),
            jupiter_price_api: default_jupiter_price_api(),
            jito_block_engine: default_jito_block_engine(),
            ipfs_gateway: default_ipfs_gateway(),
            floor_price_url: None,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            target_mint: default_target_mint(),
            max_auto_slippage_bps: default_max_auto_slippage(),
            probe_slippage_bps: default_probe_slippage(),
            platform_fee_bps: default_platform_fee(),
            referral_account: None,
            referral_program: default_referral_program(),
            shrink_percent: default_shrink_percent(),
            shrink_attempts: default_shrink_attempts(),
            payload_mode: SwapPayloadMode::default(),
            close_after_swap: true,
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
            max_accounts: None,
            builder_concurrency: default_builder_concurrency(),
        }
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            max_tx_bytes: default_max_tx_bytes(),
            headroom_bytes: default_headroom(),
            max_accounts: default_max_accounts(),
            compute_unit_limit: default_compute_unit_limit(),
            compute_unit_price: default_compute_unit_price(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::default(),
            tip_lamports: default_tip(),
            max_bundle_size: default_bundle_size(),
            inter_bundle_delay_ms: default_inter_bundle_delay(),
            max_anchor_age_secs: default_max_anchor_age(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_attempts: default_poll_attempts(),
            invalid_grace_attempts: default_invalid_grace(),
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            concurrency: default_enrich_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            wallet: WalletConfig::default(),
            endpoints: EndpointsConfig::default(),
            fetch: FetchConfig::default(),
            swap: SwapConfig::default(),
            packing: PackingConfig::default(),
            relay: RelayConfig::default(),
            poll: PollConfig::default(),
            enrich: EnrichConfig::default(),
            registry: Vec::new(),
        }
    }
}

impl SwapConfig {
    pub fn target_mint(&self) -> anyhow::Result<Pubkey> {
        Pubkey::from_str(&self.target_mint)
            .with_context(|| format!("Invalid target mint: {}", self.target_mint))
    }

    pub fn referral_account(&self) -> anyhow::Result<Option<Pubkey>> {
        self.referral_account
            .as_deref()
            .map(|s| Pubkey::from_str(s).with_context(|| format!("Invalid referral account: {s}")))
            .transpose()
    }

    pub fn referral_program(&self) -> anyhow::Result<Pubkey> {
        Pubkey::from_str(&self.referral_program)
            .with_context(|| format!("Invalid referral program: {}", self.referral_program))
    }
}

impl PackingConfig {
    /// Byte ceiling a packed transaction must stay within.
    pub fn byte_ceiling(&self) -> usize {
        self.max_tx_bytes.saturating_sub(self.headroom_bytes)
    }
}

impl RelayConfig {
    pub fn inter_bundle_delay(&self) -> Duration {
        Duration::from_millis(self.inter_bundle_delay_ms)
    }

    pub fn max_anchor_age(&self) -> Duration {
        Duration::from_secs(self.max_anchor_age_secs)
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// `SWEEPER_RPC_URL`, `SWEEPER_KEYPAIR`, `SWEEPER_RELAY_MODE`
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = std::env::var("SWEEPER_RPC_URL") {
            self.rpc.url = url;
        }
        if let Ok(path) = std::env::var("SWEEPER_KEYPAIR") {
            self.wallet.keypair_path = path;
        }
        if let Ok(mode) = std::env::var("SWEEPER_RELAY_MODE") {
            self.relay.mode = mode.parse().context("SWEEPER_RELAY_MODE")?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.swap.target_mint()?;
        self.swap.referral_account()?;
        self.swap.referral_program()?;

        if self.packing.max_tx_bytes > PACKET_DATA_SIZE {
            bail!(
                "packing.max_tx_bytes {} exceeds the {} byte packet limit",
                self.packing.max_tx_bytes,
                PACKET_DATA_SIZE
            );
        }
        if self.packing.byte_ceiling() == 0 {
            bail!("packing.headroom_bytes leaves no room for a transaction");
        }
        if self.packing.max_accounts == 0 {
            bail!("packing.max_accounts must be at least 1");
        }
        if self.relay.max_bundle_size == 0 || self.relay.max_bundle_size > MAX_BUNDLE_SIZE {
            bail!(
                "relay.max_bundle_size must be between 1 and {}, got {}",
                MAX_BUNDLE_SIZE,
                self.relay.max_bundle_size
            );
        }
        if self.swap.max_auto_slippage_bps > 10_000
            || self.swap.probe_slippage_bps > 10_000
            || self.swap.platform_fee_bps > 10_000
        {
            bail!("basis point settings must be at most 10000");
        }
        if self.swap.shrink_percent == 0 || self.swap.shrink_percent >= 100 {
            bail!("swap.shrink_percent must be between 1 and 99");
        }
        if self.swap.shrink_attempts == 0 {
            bail!("swap.shrink_attempts must be at least 1");
        }
        if self.swap.builder_concurrency == 0 || self.enrich.concurrency == 0 {
            bail!("concurrency settings must be at least 1");
        }
        if self.poll.max_attempts == 0 {
            bail!("poll.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.swap.target_mint().unwrap().to_string(), LOCKIN_MINT);
        assert_eq!(config.relay.max_bundle_size, 5);
        assert_eq!(config.poll.interval(), Duration::from_secs(2));
        assert_eq!(config.poll.max_attempts, 30);
        assert_eq!(config.packing.byte_ceiling(), 1200);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[rpc]
url = "http://localhost:8899"

[relay]
mode = "direct"
max_bundle_size = 3

[fetch.api]
max_concurrent = 1
min_interval_ms = 0
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.rpc.url, "http://localhost:8899");
        assert_eq!(config.rpc.timeout_secs, 30);
        assert_eq!(config.relay.mode, RelayMode::Direct);
        assert_eq!(config.relay.max_bundle_size, 3);
        assert_eq!(config.fetch.api.max_concurrent, 1);
        assert_eq!(config.fetch.rpc.max_concurrent, 5);
        assert_eq!(config.swap.platform_fee_bps, 150);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_oversized_bundle() {
        let mut config = Config::default();
        config.relay.max_bundle_size = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_target() {
        let mut config = Config::default();
        config.swap.target_mint = "not-a-mint".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_mode_parse() {
        assert_eq!("Bundle".parse::<RelayMode>().unwrap(), RelayMode::Bundle);
        assert_eq!("direct".parse::<RelayMode>().unwrap(), RelayMode::Direct);
        assert!("carrier-pigeon".parse::<RelayMode>().is_err());
    }
}
