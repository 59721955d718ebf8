//! Instruction builder
//!
//! Turns the selected holdings into packer items: a close for every empty
//! account, and for everything else a quoted swap into the target mint
//! (shrinking the amount when the route cannot absorb all of it), with its
//! lookup tables resolved. Failures are per holding.

use futures::stream::{self, StreamExt};
use solana_sdk::{
    address_lookup_table::state::AddressLookupTable,
    instruction::Instruction,
    message::AddressLookupTableAccount,
    pubkey::Pubkey,
};
use std::sync::Arc;
use tracing::{debug, info};

use super::errors::TransactionBuilderError;
use super::instructions::{close_account_instruction, referral_fee_account};
use super::packer::PackItem;
use crate::compat::{decompile_instructions, get_required_signers, lookup_table_addresses, strip_compute_budget};
use crate::config::SwapConfig;
use crate::fetch::FetchLayer;
use crate::holdings::{Holding, SelectionSet};
use crate::metrics::Metrics;
use crate::services::{
    QuoteRequest, Quote, Services, Slippage, SwapOptions, SwapPayload, SwapPayloadMode,
};
use crate::structured_logging::StructuredLogger;

/// Label of the batch closing empty token accounts.
pub const CLOSE_BATCH_LABEL: &str = "close-empty";

/// Resolved swap parameters for one lock-in action.
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub owner: Pubkey,
    pub target_mint: Pubkey,
    pub max_auto_slippage_bps: u16,
    pub fee_account: Option<Pubkey>,
    pub shrink_percent: u8,
    pub shrink_attempts: u32,
    pub payload_mode: SwapPayloadMode,
    pub close_after_swap: bool,
    pub wrap_and_unwrap_sol: bool,
    pub dynamic_compute_unit_limit: bool,
    pub concurrency: usize,
}

impl BuilderSettings {
    pub fn from_config(owner: Pubkey, swap: &SwapConfig) -> anyhow::Result<Self> {
        let target_mint = swap.target_mint()?;
        let fee_account = match swap.referral_account()? {
            Some(referral) => Some(referral_fee_account(
                &referral,
                &target_mint,
                &swap.referral_program()?,
            )),
            None => None,
        };
        Ok(Self {
            owner,
            target_mint,
            max_auto_slippage_bps: swap.max_auto_slippage_bps,
            fee_account,
            shrink_percent: swap.shrink_percent,
            shrink_attempts: swap.shrink_attempts.max(1),
            payload_mode: swap.payload_mode,
            close_after_swap: swap.close_after_swap,
            wrap_and_unwrap_sol: swap.wrap_and_unwrap_sol,
            dynamic_compute_unit_limit: swap.dynamic_compute_unit_limit,
            concurrency: swap.builder_concurrency.max(1),
        })
    }
}

/// Swap instructions for one holding, ready to pack as a group
#[derive(Debug, Clone)]
pub struct BuiltSwap {
    pub holding: Holding,
    /// Raw amount the accepted quote covers
    pub quoted_amount: u64,
    pub instructions: Vec<Instruction>,
    pub lookup_tables: Vec<AddressLookupTableAccount>,
    /// The token account is closed in the same transaction
    pub closes_account: bool,
}

impl BuiltSwap {
    pub fn label(&self) -> String {
        self.holding.token_account.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct BuildFailure {
    pub holding: Holding,
    pub reason: TransactionBuilderError,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub swaps: Vec<BuiltSwap>,
    /// Empty accounts to close without a swap
    pub closes: Vec<Holding>,
    pub failures: Vec<BuildFailure>,
}

impl BuildOutput {
    /// Packer items: swaps in selection order, then one close batch.
    pub fn pack_items(&self, owner: Pubkey) -> Vec<PackItem> {
        let mut items: Vec<PackItem> = self
            .swaps
            .iter()
            .map(|swap| PackItem::Group {
                label: swap.label(),
                instructions: swap.instructions.clone(),
                lookup_tables: swap.lookup_tables.clone(),
            })
            .collect();
        if !self.closes.is_empty() {
            items.push(PackItem::CloseBatch {
                label: CLOSE_BATCH_LABEL.to_string(),
                accounts: self.closes.iter().map(|h| h.token_account).collect(),
                owner,
            });
        }
        items
    }
}

enum Built {
    Swap(BuiltSwap),
    Close(Holding),
}

pub struct InstructionBuilder {
    services: Services,
    fetch: Arc<FetchLayer>,
    metrics: Arc<Metrics>,
    settings: BuilderSettings,
}

impl InstructionBuilder {
    pub fn new(services: Services, fetch: Arc<FetchLayer>, metrics: Arc<Metrics>, settings: BuilderSettings) -> Self {
        Self {
            services,
            fetch,
            metrics,
            settings,
        }
    }

    /// Build every selected holding with bounded parallelism. Output keeps
    /// selection order.
    pub async fn build(&self, selection: &SelectionSet, logger: &StructuredLogger) -> BuildOutput {
        logger.log_stage("build", selection.len());

        let results: Vec<(Holding, Result<Built, TransactionBuilderError>)> =
            stream::iter(selection.holdings().iter().cloned())
                .map(|holding| async move {
                    let result = self.build_one(&holding).await;
                    (holding, result)
                })
                .buffered(self.settings.concurrency)
                .collect()
                .await;

        let mut output = BuildOutput::default();
        for (holding, result) in results {
            match result {
                Ok(Built::Swap(swap)) => {
                    logger.log_instructions_built(
                        &holding.token_account,
                        &holding.mint,
                        swap.instructions.len(),
                        swap.lookup_tables.len(),
                    );
                    output.swaps.push(swap);
                }
                Ok(Built::Close(holding)) => output.closes.push(holding),
                Err(reason) => {
                    logger.log_build_failure(&holding.token_account, &holding.mint, &reason.to_string());
                    self.metrics.build_failures.inc();
                    output.failures.push(BuildFailure { holding, reason });
                }
            }
        }

        info!(
            swaps = output.swaps.len(),
            closes = output.closes.len(),
            failures = output.failures.len(),
            "Instruction building complete"
        );
        output
    }

    async fn build_one(&self, holding: &Holding) -> Result<Built, TransactionBuilderError> {
        if holding.raw_amount == 0 {
            return Ok(Built::Close(holding.clone()));
        }

        let (quote, quoted_amount) = self.quote_with_shrink(holding).await?;
        let (mut instructions, lookup_tables) = self.swap_instructions(&quote).await?;

        let closes_account = self.settings.close_after_swap
            && quoted_amount == holding.raw_amount
            && holding.mint != spl_token::native_mint::id();
        if closes_account {
            instructions.push(close_account_instruction(&holding.token_account, &self.settings.owner)?);
        }

        Ok(Built::Swap(BuiltSwap {
            holding: holding.clone(),
            quoted_amount,
            instructions,
            lookup_tables,
            closes_account,
        }))
    }

    /// Quote the full balance, shrinking by `shrink_percent` each time the
    /// aggregator reports the route cannot take the whole amount.
    async fn quote_with_shrink(&self, holding: &Holding) -> Result<(Quote, u64), TransactionBuilderError> {
        let aggregator = &self.services.aggregator;
        let mut amount = holding.raw_amount;

        for attempt in 1..=self.settings.shrink_attempts {
            let request = QuoteRequest {
                input_mint: holding.mint,
                output_mint: self.settings.target_mint,
                amount,
                slippage: Slippage::Auto {
                    max_bps: self.settings.max_auto_slippage_bps,
                },
            };
            let request = &request;
            self.metrics.quotes_requested.inc();
            match self
                .fetch
                .schedule_api("quote", move || aggregator.quote(request))
                .await
            {
                Ok(quote) if quote.has_route() => return Ok((quote, amount)),
                Ok(_) => {
                    return Err(TransactionBuilderError::quote_failed(holding.mint, "no route to target"))
                }
                Err(e) if e.is_partial_route() => {
                    if attempt == self.settings.shrink_attempts {
                        break;
                    }
                    let next = shrink(amount, self.settings.shrink_percent);
                    debug!(
                        mint = %holding.mint,
                        attempt,
                        amount,
                        next,
                        "Route cannot absorb amount, shrinking"
                    );
                    if next == 0 {
                        break;
                    }
                    self.metrics.quote_shrinks.inc();
                    amount = next;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TransactionBuilderError::quote_failed(
            holding.mint,
            format!(
                "route cannot absorb the amount after {} quotes",
                self.settings.shrink_attempts
            ),
        ))
    }

    async fn swap_instructions(
        &self,
        quote: &Quote,
    ) -> Result<(Vec<Instruction>, Vec<AddressLookupTableAccount>), TransactionBuilderError> {
        let options = SwapOptions {
            user: self.settings.owner,
            fee_account: self.settings.fee_account,
            wrap_and_unwrap_sol: self.settings.wrap_and_unwrap_sol,
            dynamic_compute_unit_limit: self.settings.dynamic_compute_unit_limit,
        };
        let aggregator = &self.services.aggregator;
        let options = &options;
        let mode = self.settings.payload_mode;
        let payload = self
            .fetch
            .schedule_api("swap_payload", move || aggregator.swap_payload(quote, options, mode))
            .await
            .map_err(|e| TransactionBuilderError::SwapPayload(e.to_string()))?;

        match payload {
            SwapPayload::Instructions(set) => {
                let tables = self.resolve_lookup_tables(&set.lookup_table_addresses).await?;
                Ok((strip_compute_budget(set.ordered()), tables))
            }
            SwapPayload::PrebuiltTransaction(tx) => {
                if get_required_signers(&tx.message) != [self.settings.owner] {
                    return Err(TransactionBuilderError::SwapPayload(
                        "prebuilt swap requires signers other than the wallet".to_string(),
                    ));
                }
                let tables = self
                    .resolve_lookup_tables(&lookup_table_addresses(&tx.message))
                    .await?;
                let instructions = decompile_instructions(&tx.message, &tables)?;
                Ok((strip_compute_budget(instructions), tables))
            }
        }
    }

    /// Fetch and decode lookup tables; every address must resolve.
    pub async fn resolve_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, TransactionBuilderError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let chain = &self.services.chain;
        let accounts = self
            .fetch
            .schedule_rpc("lookup_tables", move || chain.multiple_account_data(addresses))
            .await?;

        addresses
            .iter()
            .zip(accounts.into_iter().chain(std::iter::repeat(None)))
            .map(|(key, data)| {
                let data = data.ok_or_else(|| TransactionBuilderError::lookup_table(*key, "account not found"))?;
                let table = AddressLookupTable::deserialize(&data)
                    .map_err(|e| TransactionBuilderError::lookup_table(*key, e.to_string()))?;
                Ok(AddressLookupTableAccount {
                    key: *key,
                    addresses: table.addresses.to_vec(),
                })
            })
            .collect()
    }
}

/// `amount` reduced by `percent` percent, rounding down.
fn shrink(amount: u64, percent: u8) -> u64 {
    let kept = 100u128.saturating_sub(u128::from(percent));
    (u128::from(amount) * kept / 100) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink() {
        assert_eq!(shrink(1_000, 5), 950);
        assert_eq!(shrink(950, 5), 902);
        assert_eq!(shrink(u64::MAX, 5), (u128::from(u64::MAX) * 95 / 100) as u64);
        assert_eq!(shrink(1, 5), 0);
    }

    #[test]
    fn test_pack_items_order() {
        let owner = Pubkey::new_unique();
        let holding = crate::test_utils::holding(Pubkey::new_unique(), 10, 0);
        let empty = crate::test_utils::holding(Pubkey::new_unique(), 0, 0);
        let output = BuildOutput {
            swaps: vec![BuiltSwap {
                holding: holding.clone(),
                quoted_amount: 10,
                instructions: vec![],
                lookup_tables: vec![],
                closes_account: true,
            }],
            closes: vec![empty.clone()],
            failures: vec![],
        };
        let items = output.pack_items(owner);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], PackItem::Group { label, .. } if *label == holding.token_account.to_string()));
        assert!(matches!(
            &items[1],
            PackItem::CloseBatch { accounts, owner: o, .. } if *accounts == vec![empty.token_account] && *o == owner
        ));
    }
}
