//! Instruction construction and ordering validation
//!
//! Every packed transaction has the same frame:
//! 1. Compute budget instructions (CU limit, CU price)
//! 2. Holding instructions (swaps, account closes) in selection order
//! 3. One tip transfer to a relay tip account (bundle mode only)
//!
//! The helpers here build the frame pieces and the per-holding primitives
//! the builder needs; `sanity_check_ix_order` checks the frame in debug and
//! test builds.

use crate::tx_builder::errors::TransactionBuilderError;
use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
    pubkey::Pubkey,
    system_instruction, system_program,
};

/// Seed prefix of the aggregator's referral token accounts.
const REFERRAL_ATA_SEED: &[u8] = b"referral_ata";

/// Compute budget instructions placed at the front of every transaction
///
/// # Arguments
///
/// * `cu_limit` - Compute unit limit (0 = skip this instruction)
/// * `cu_price` - Priority fee in micro-lamports per CU (0 = skip this instruction)
pub fn compute_budget_prelude(cu_limit: u32, cu_price: u64) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(2);
    if cu_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
    }
    if cu_price > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(cu_price));
    }
    instructions
}

/// Tip transfer appended to bundled transactions
pub fn tip_instruction(payer: &Pubkey, tip_account: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(payer, tip_account, lamports)
}

/// Close an SPL token account, returning its rent to the owner
///
/// Destination and authority are both the owner.
///
/// # Errors
///
/// Returns `TransactionBuilderError::InstructionBuild` if the token program
/// rejects the arguments.
pub fn close_account_instruction(
    token_account: &Pubkey,
    owner: &Pubkey,
) -> Result<Instruction, TransactionBuilderError> {
    spl_token::instruction::close_account(&spl_token::id(), token_account, owner, owner, &[])
        .map_err(|e| TransactionBuilderError::instruction_failed("spl_token", e.to_string()))
}

/// Token account of `referral_account` collecting platform fees in `mint`
pub fn referral_fee_account(referral_account: &Pubkey, mint: &Pubkey, referral_program: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[REFERRAL_ATA_SEED, referral_account.as_ref(), mint.as_ref()],
        referral_program,
    )
    .0
}

pub fn is_compute_budget(ix: &Instruction) -> bool {
    ix.program_id == compute_budget::id()
}

/// System transfer (discriminator 2) into one of `tip_accounts`
pub fn is_tip_transfer(ix: &Instruction, tip_accounts: &[Pubkey]) -> bool {
    ix.program_id == system_program::id()
        && ix.data.len() >= 4
        && ix.data[..4] == [2, 0, 0, 0]
        && ix
            .accounts
            .get(1)
            .is_some_and(|meta| tip_accounts.contains(&meta.pubkey))
}

/// Validate the transaction frame (debug/test only)
///
/// Expected order:
/// 1. Compute budget instructions, and nowhere else
/// 2. Holding instructions
/// 3. Exactly one tip transfer, last, when `tip_accounts` is non-empty
///
/// # Errors
///
/// Returns `TransactionBuilderError::Configuration` describing the first
/// violation found.
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    tip_accounts: &[Pubkey],
) -> Result<(), TransactionBuilderError> {
    if instructions.is_empty() {
        return Err(TransactionBuilderError::Configuration(
            "Instruction list is empty".to_string(),
        ));
    }

    let prelude = instructions.iter().take_while(|ix| is_compute_budget(ix)).count();
    if prelude == 0 {
        return Err(TransactionBuilderError::Configuration(format!(
            "Transaction must start with compute budget, got program_id: {}",
            instructions[0].program_id
        )));
    }
    if let Some(idx) = instructions.iter().skip(prelude).position(is_compute_budget) {
        return Err(TransactionBuilderError::Configuration(format!(
            "Compute budget instruction outside the prelude (at position {})",
            idx + prelude
        )));
    }

    let tips: Vec<usize> = instructions
        .iter()
        .enumerate()
        .filter(|(_, ix)| is_tip_transfer(ix, tip_accounts))
        .map(|(idx, _)| idx)
        .collect();
    if tip_accounts.is_empty() {
        return Ok(());
    }
    match tips.as_slice() {
        [idx] if *idx == instructions.len() - 1 => Ok(()),
        [idx] => Err(TransactionBuilderError::Configuration(format!(
            "Tip transfer must be the last instruction (found at position {})",
            idx
        ))),
        found => Err(TransactionBuilderError::Configuration(format!(
            "Expected exactly one tip transfer, found {}",
            found.len()
        ))),
    }
}

/// No-op version of sanity_check_ix_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(
    _instructions: &[Instruction],
    _tip_accounts: &[Pubkey],
) -> Result<(), TransactionBuilderError> {
    Ok(())
}
