//! Compatibility layer for Solana message formats
//!
//! Helpers that work uniformly over Legacy and V0 messages, plus the inverse
//! of `v0::Message::try_compile`: turning a compiled message (for example a
//! prebuilt swap transaction) back into `Instruction`s with the lookup-table
//! loaded addresses resolved, so it can be repacked.

use solana_sdk::{
    compute_budget,
    instruction::{AccountMeta, Instruction},
    message::{AddressLookupTableAccount, MessageHeader, VersionedMessage},
    pubkey::Pubkey,
};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecompileError {
    #[error("lookup table {0} not provided")]
    MissingLookupTable(Pubkey),

    #[error("lookup table {table} has no index {index}")]
    LookupIndexOutOfRange { table: Pubkey, index: u8 },

    #[error("account index {0} out of range")]
    AccountIndexOutOfRange(u8),
}

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Static account keys (excludes lookup-table loaded addresses).
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    message.static_account_keys()
}

/// Accounts that must sign: the first `num_required_signatures` static keys.
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let keys = get_static_account_keys(message);
    let n = (get_message_header(message).num_required_signatures as usize).min(keys.len());
    &keys[..n]
}

/// Lookup tables referenced by a message, in message order.
#[must_use]
pub fn lookup_table_addresses(message: &VersionedMessage) -> Vec<Pubkey> {
    match message {
        VersionedMessage::Legacy(_) => Vec::new(),
        VersionedMessage::V0(m) => m.address_table_lookups.iter().map(|l| l.account_key).collect(),
    }
}

/// Number of distinct accounts a message touches, static plus loaded.
#[must_use]
pub fn total_account_count(message: &VersionedMessage) -> usize {
    let loaded = match message {
        VersionedMessage::Legacy(_) => 0,
        VersionedMessage::V0(m) => m
            .address_table_lookups
            .iter()
            .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
            .sum(),
    };
    get_static_account_keys(message).len() + loaded
}

/// Rebuild the instruction list of a compiled message.
///
/// Account order follows the runtime: static keys, then every table's
/// writable addresses, then every table's readonly addresses.
pub fn decompile_instructions(
    message: &VersionedMessage,
    lookup_tables: &[AddressLookupTableAccount],
) -> Result<Vec<Instruction>, DecompileError> {
    let header = get_message_header(message);
    let static_keys = get_static_account_keys(message);
    let num_signed = header.num_required_signatures as usize;
    let writable_signed = num_signed.saturating_sub(header.num_readonly_signed_accounts as usize);
    let writable_unsigned_end = static_keys
        .len()
        .saturating_sub(header.num_readonly_unsigned_accounts as usize);

    let mut keys: Vec<(Pubkey, bool, bool)> = static_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let is_signer = i < num_signed;
            let is_writable = if is_signer {
                i < writable_signed
            } else {
                i < writable_unsigned_end
            };
            (*key, is_signer, is_writable)
        })
        .collect();

    if let VersionedMessage::V0(m) = message {
        let mut writable = Vec::new();
        let mut readonly = Vec::new();
        for lookup in &m.address_table_lookups {
            let table = lookup_tables
                .iter()
                .find(|t| t.key == lookup.account_key)
                .ok_or(DecompileError::MissingLookupTable(lookup.account_key))?;
            let resolve = |index: &u8| {
                table
                    .addresses
                    .get(*index as usize)
                    .copied()
                    .ok_or(DecompileError::LookupIndexOutOfRange {
                        table: table.key,
                        index: *index,
                    })
            };
            for index in &lookup.writable_indexes {
                writable.push((resolve(index)?, false, true));
            }
            for index in &lookup.readonly_indexes {
                readonly.push((resolve(index)?, false, false));
            }
        }
        keys.extend(writable);
        keys.extend(readonly);
    }

    message
        .instructions()
        .iter()
        .map(|compiled| {
            let lookup = |index: u8| {
                keys.get(index as usize)
                    .copied()
                    .ok_or(DecompileError::AccountIndexOutOfRange(index))
            };
            let (program_id, _, _) = lookup(compiled.program_id_index)?;
            let accounts = compiled
                .accounts
                .iter()
                .map(|&index| {
                    lookup(index).map(|(pubkey, is_signer, is_writable)| AccountMeta {
                        pubkey,
                        is_signer,
                        is_writable,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Instruction {
                program_id,
                accounts,
                data: compiled.data.clone(),
            })
        })
        .collect()
}

/// Drop compute-budget instructions; the packer sets its own.
pub fn strip_compute_budget(instructions: Vec<Instruction>) -> Vec<Instruction> {
    instructions
        .into_iter()
        .filter(|ix| ix.program_id != compute_budget::id())
        .collect()
}
