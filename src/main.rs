//! lockin-sweeper command line tool
//!
//! `scan` lists a wallet's holdings and how each would be treated; `sweep`
//! converts the selected holdings into the target token.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lockin_sweeper::config::{Config, RelayMode};
use lockin_sweeper::fetch::FetchLayer;
use lockin_sweeper::holdings::{Partition, SelectionSet};
use lockin_sweeper::metrics::Metrics;
use lockin_sweeper::rpc::SolanaRpc;
use lockin_sweeper::services::{HttpContent, JitoClient, JupiterClient, Services};
use lockin_sweeper::structured_logging::StructuredLogger;
use lockin_sweeper::wallet::KeypairWallet;
use lockin_sweeper::{LockInPipeline, LockInReport, Summary};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "SWEEPER_CONFIG")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate, price and classify the wallet's holdings
    Scan {
        /// Print the Prometheus metrics text after the scan
        #[arg(long)]
        metrics: bool,
    },

    /// Convert selected holdings into the target token
    Sweep {
        /// Mint to convert (repeatable)
        #[arg(long = "mint")]
        mints: Vec<String>,

        /// Convert every convertible holding and close every empty account
        #[arg(long)]
        all: bool,

        /// Override the relay mode from the config file
        #[arg(long)]
        mode: Option<RelayMode>,

        /// Build and pack without signing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    let mut config = load_config(&args.config)?;
    if let Command::Sweep { mode: Some(mode), .. } = &args.command {
        config.relay.mode = *mode;
    }
    config.validate().context("Invalid configuration")?;

    let wallet = Arc::new(
        KeypairWallet::from_file(&config.wallet.keypair_path)
            .context("Failed to load wallet keypair")?,
    );
    let owner = wallet.pubkey();
    info!(%owner, rpc = %config.rpc.url, mode = ?config.relay.mode, "Wallet loaded");

    let metrics = Arc::new(Metrics::new()?);
    let fetch = Arc::new(FetchLayer::new(&config.fetch, metrics.clone()));
    let services = build_services(&config)?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let pipeline = LockInPipeline::new(services, wallet.clone(), fetch, metrics.clone(), config)?
        .with_cancellation(cancel_rx);

    match args.command {
        Command::Scan { metrics: show_metrics } => {
            let (report, parts) = pipeline.scan(&owner).await?;
            print_partition(&parts);
            for (account, reason) in &report.dropped {
                println!("  dropped {account}: {reason}");
            }
            if show_metrics {
                println!("{}", metrics.gather_text()?);
            }
        }
        Command::Sweep {
            mints, all, dry_run, ..
        } => {
            let (_, parts) = pipeline.scan(&owner).await?;
            let selection = select(&pipeline, &parts, &mints, all)?;
            if selection.is_empty() {
                println!("Nothing selected");
                return Ok(());
            }

            if dry_run {
                let logger = StructuredLogger::new("dry-run".to_string());
                match pipeline.plan(&selection, &logger).await? {
                    Some(plan) => {
                        println!(
                            "{} swaps, {} closes, {} build failures, {} transactions, {} oversized",
                            plan.build.swaps.len(),
                            plan.build.closes.len(),
                            plan.build.failures.len(),
                            plan.pack.transactions.len(),
                            plan.pack.oversized.len()
                        );
                    }
                    None => println!("Wallet not ready"),
                }
                return Ok(());
            }

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, no further units will be sent");
                    let _ = cancel_tx.send(true);
                }
            });
            let report = pipeline.lock_in(&selection).await?;
            print_report(&report);
            if matches!(report.summary, Summary::TotalFailure) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "lockin_sweeper=debug,info"
    } else {
        "lockin_sweeper=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }
}

fn build_services(config: &Config) -> Result<Services> {
    let http_timeout = Duration::from_secs(config.endpoints.http_timeout_secs);
    let chain = Arc::new(SolanaRpc::new(&config.rpc.url, Duration::from_secs(config.rpc.timeout_secs)));
    let jupiter = Arc::new(
        JupiterClient::new(
            &config.endpoints.jupiter_swap_api,
            &config.endpoints.jupiter_price_api,
            http_timeout,
        )?
        .with_platform_fee_bps(config.swap.referral_account.as_ref().map(|_| config.swap.platform_fee_bps))
        .with_max_accounts(config.swap.max_accounts),
    );
    let relay = Arc::new(JitoClient::new(&config.endpoints.jito_block_engine, http_timeout)?);
    let content = Arc::new(HttpContent::new(
        &config.endpoints.ipfs_gateway,
        config.endpoints.floor_price_url.as_deref(),
        http_timeout,
    )?);

    Ok(Services {
        chain,
        aggregator: jupiter.clone(),
        prices: jupiter,
        relay,
        content: content.clone(),
        floor: content,
    })
}

/// Selection from `--mint` flags, or everything convertible plus every
/// empty account with `--all`.
fn select(pipeline: &LockInPipeline, parts: &Partition, mints: &[String], all: bool) -> Result<SelectionSet> {
    let wanted = mints
        .iter()
        .map(|m| Pubkey::from_str(m).with_context(|| format!("Invalid mint: {m}")))
        .collect::<Result<Vec<_>>>()?;

    let mut selection = SelectionSet::new(*pipeline.target_mint());
    for holding in parts.convertible.iter().chain(parts.closable.iter()) {
        if all || wanted.contains(&holding.mint) {
            selection.insert(holding.clone())?;
        }
    }
    for (holding, reason) in &parts.ignored {
        if wanted.contains(&holding.mint) {
            warn!(mint = %holding.mint, %reason, "Requested mint is not convertible, skipping");
        }
    }
    Ok(selection)
}

fn print_partition(parts: &Partition) {
    println!("Convertible ({}):", parts.convertible.len());
    for h in &parts.convertible {
        println!(
            "  {:<10} {:>20.6} ${:>12.2}  {}",
            h.symbol,
            h.ui_amount(),
            h.usd_value,
            h.mint
        );
    }
    println!("Closable ({}):", parts.closable.len());
    for h in &parts.closable {
        println!("  {:<10} {}", h.symbol, h.token_account);
    }
    println!("Ignored ({}):", parts.ignored.len());
    for (h, reason) in &parts.ignored {
        println!("  {:<10} {:>20.6}  {}", h.symbol, h.ui_amount(), reason);
    }
}

fn print_report(report: &LockInReport) {
    println!(
        "Lock-in {}: {:?} ({} transactions in {} units)",
        report.correlation_id, report.summary, report.transactions, report.units
    );
    for outcome in &report.outcomes {
        println!("  {} {}  {}", outcome.mint, outcome.token_account, outcome.status);
    }
    println!("{} token accounts swapped or closed", report.closed_accounts.len());
}
