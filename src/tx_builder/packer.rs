//! Transaction packer
//!
//! Greedily fills v0 transactions with holding instructions while keeping
//! each one within the packet byte ceiling and the account cap. Sizes are
//! measured on the real compiled message, lookup tables included, with one
//! placeholder signature per required signer.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, AddressLookupTableAccount, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::instructions::{
    close_account_instruction, compute_budget_prelude, sanity_check_ix_order, tip_instruction,
};
use super::errors::TransactionBuilderError;
use crate::compat::total_account_count;
use crate::config::PackingConfig;

/// Unit of work handed to the packer
#[derive(Debug, Clone)]
pub enum PackItem {
    /// A lone instruction with no lookup tables
    Instruction(Instruction),

    /// Instructions that must land in the same transaction (one swap)
    Group {
        label: String,
        instructions: Vec<Instruction>,
        lookup_tables: Vec<AddressLookupTableAccount>,
    },

    /// Token accounts to close; may be split across transactions
    CloseBatch {
        label: String,
        accounts: Vec<Pubkey>,
        owner: Pubkey,
    },
}

/// Tip transfer appended to every transaction in bundle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipConfig {
    pub account: Pubkey,
    pub lamports: u64,
}

/// Blockhash a transaction was compiled against and when it was fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub blockhash: Hash,
    pub fetched_at: Instant,
}

impl Anchor {
    pub fn new(blockhash: Hash) -> Self {
        Self {
            blockhash,
            fetched_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// One transaction's worth of instructions
#[derive(Debug, Clone)]
pub struct PackedTransaction {
    /// Full instruction list: compute budget, body, optional tip
    pub instructions: Vec<Instruction>,
    pub lookup_tables: Vec<AddressLookupTableAccount>,
    /// Labels of the items (fully or partly) inside
    pub labels: Vec<String>,
    /// Token accounts closed by `CloseBatch` items placed here
    pub closed_accounts: Vec<Pubkey>,
    pub anchor: Option<Anchor>,
    prelude_len: usize,
    has_tip: bool,
}

impl PackedTransaction {
    /// Instructions between the compute budget prelude and the tip.
    pub fn body(&self) -> &[Instruction] {
        let end = self.instructions.len() - usize::from(self.has_tip);
        &self.instructions[self.prelude_len..end]
    }

    pub fn has_tip(&self) -> bool {
        self.has_tip
    }

    /// Compile against `blockhash` and attach the anchor. Signatures are
    /// placeholders until the wallet signs.
    pub fn compile(&mut self, payer: &Pubkey, blockhash: Hash) -> Result<VersionedTransaction, TransactionBuilderError> {
        let tx = compile_unsigned(payer, &self.instructions, &self.lookup_tables, blockhash)?;
        self.anchor = Some(Anchor::new(blockhash));
        Ok(tx)
    }

    /// True when no anchor is attached or it is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.anchor.map_or(true, |anchor| anchor.age() > max_age)
    }
}

/// Item that cannot fit an empty transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedItem {
    pub label: Option<String>,
    /// Set when the item is a single close from a `CloseBatch`
    pub close_account: Option<Pubkey>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PackResult {
    pub transactions: Vec<PackedTransaction>,
    pub oversized: Vec<OversizedItem>,
}

/// Serialized size and distinct account count of a candidate transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxFootprint {
    pub bytes: usize,
    pub accounts: usize,
}

#[derive(Debug, Default)]
struct Draft {
    body: Vec<Instruction>,
    lookup_tables: Vec<AddressLookupTableAccount>,
    labels: Vec<String>,
    closed_accounts: Vec<Pubkey>,
}

impl Draft {
    fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    fn merged_tables(&self, extra: &[AddressLookupTableAccount]) -> Vec<AddressLookupTableAccount> {
        let mut tables = self.lookup_tables.clone();
        for table in extra {
            if !tables.iter().any(|t| t.key == table.key) {
                tables.push(table.clone());
            }
        }
        tables
    }

    fn push_label(&mut self, label: &str) {
        if !self.labels.iter().any(|l| l == label) {
            self.labels.push(label.to_string());
        }
    }
}

struct Unit<'a> {
    instructions: Vec<Instruction>,
    lookup_tables: &'a [AddressLookupTableAccount],
    label: Option<&'a str>,
    close_account: Option<Pubkey>,
}

pub struct TransactionPacker {
    payer: Pubkey,
    byte_ceiling: usize,
    max_accounts: usize,
    compute_unit_limit: u32,
    compute_unit_price: u64,
    tip: Option<TipConfig>,
}

impl TransactionPacker {
    pub fn new(payer: Pubkey, config: &PackingConfig, tip: Option<TipConfig>) -> Self {
        Self {
            payer,
            byte_ceiling: config.byte_ceiling(),
            max_accounts: config.max_accounts,
            compute_unit_limit: config.compute_unit_limit,
            compute_unit_price: config.compute_unit_price,
            tip,
        }
    }

    pub fn byte_ceiling(&self) -> usize {
        self.byte_ceiling
    }

    /// Footprint of a transaction carrying `body` inside the standard frame,
    /// or `None` when it does not compile.
    pub fn footprint(&self, body: &[Instruction], lookup_tables: &[AddressLookupTableAccount]) -> Option<TxFootprint> {
        let instructions = self.framed(body);
        let tx = compile_unsigned(&self.payer, &instructions, lookup_tables, Hash::default()).ok()?;
        let bytes = bincode::serialized_size(&tx).ok()? as usize;
        Some(TxFootprint {
            bytes,
            accounts: total_account_count(&tx.message),
        })
    }

    fn fits(&self, body: &[Instruction], lookup_tables: &[AddressLookupTableAccount]) -> bool {
        self.footprint(body, lookup_tables)
            .is_some_and(|f| f.bytes <= self.byte_ceiling && f.accounts <= self.max_accounts)
    }

    fn framed(&self, body: &[Instruction]) -> Vec<Instruction> {
        let mut instructions = compute_budget_prelude(self.compute_unit_limit, self.compute_unit_price);
        instructions.extend_from_slice(body);
        if let Some(tip) = &self.tip {
            instructions.push(tip_instruction(&self.payer, &tip.account, tip.lamports));
        }
        instructions
    }

    /// Pack items in order. Never fails as a whole: items that cannot fit
    /// an empty transaction are reported in `oversized`.
    pub fn pack(&self, items: Vec<PackItem>) -> PackResult {
        let mut result = PackResult::default();
        let mut draft = Draft::default();

        for item in items {
            match item {
                PackItem::Instruction(ix) => {
                    let unit = Unit {
                        instructions: vec![ix],
                        lookup_tables: &[],
                        label: None,
                        close_account: None,
                    };
                    self.place(unit, &mut draft, &mut result);
                }
                PackItem::Group {
                    label,
                    instructions,
                    lookup_tables,
                } => {
                    let unit = Unit {
                        instructions,
                        lookup_tables: &lookup_tables,
                        label: Some(label.as_str()),
                        close_account: None,
                    };
                    self.place(unit, &mut draft, &mut result);
                }
                PackItem::CloseBatch { label, accounts, owner } => {
                    for account in accounts {
                        match close_account_instruction(&account, &owner) {
                            Ok(ix) => {
                                let unit = Unit {
                                    instructions: vec![ix],
                                    lookup_tables: &[],
                                    label: Some(label.as_str()),
                                    close_account: Some(account),
                                };
                                self.place(unit, &mut draft, &mut result);
                            }
                            Err(e) => result.oversized.push(OversizedItem {
                                label: Some(label.clone()),
                                close_account: Some(account),
                                reason: e.to_string(),
                            }),
                        }
                    }
                }
            }
        }

        if !draft.is_empty() {
            result.transactions.push(self.seal(draft));
        }
        debug!(
            transactions = result.transactions.len(),
            oversized = result.oversized.len(),
            "Packing complete"
        );
        result
    }

    fn place(&self, unit: Unit<'_>, draft: &mut Draft, result: &mut PackResult) {
        if self.try_append(&unit, draft) {
            return;
        }
        if !draft.is_empty() {
            let mut fresh = Draft::default();
            if self.try_append(&unit, &mut fresh) {
                let full = std::mem::replace(draft, fresh);
                result.transactions.push(self.seal(full));
                return;
            }
        }
        let footprint = self.footprint(&unit.instructions, unit.lookup_tables);
        let reason = match footprint {
            Some(f) => format!(
                "{} bytes / {} accounts exceeds {} bytes / {} accounts",
                f.bytes, f.accounts, self.byte_ceiling, self.max_accounts
            ),
            None => "instructions do not compile into a v0 message".to_string(),
        };
        warn!(label = ?unit.label, %reason, "Item does not fit an empty transaction");
        result.oversized.push(OversizedItem {
            label: unit.label.map(str::to_string),
            close_account: unit.close_account,
            reason,
        });
    }

    fn try_append(&self, unit: &Unit<'_>, draft: &mut Draft) -> bool {
        let tables = draft.merged_tables(unit.lookup_tables);
        let mut body = draft.body.clone();
        body.extend(unit.instructions.iter().cloned());
        if !self.fits(&body, &tables) {
            return false;
        }
        draft.body = body;
        draft.lookup_tables = tables;
        if let Some(label) = unit.label {
            draft.push_label(label);
        }
        if let Some(account) = unit.close_account {
            draft.closed_accounts.push(account);
        }
        true
    }

    fn seal(&self, draft: Draft) -> PackedTransaction {
        let instructions = self.framed(&draft.body);
        let prelude_len = compute_budget_prelude(self.compute_unit_limit, self.compute_unit_price).len();
        let tip_accounts: Vec<Pubkey> = self.tip.iter().map(|t| t.account).collect();
        debug_assert!(sanity_check_ix_order(&instructions, &tip_accounts).is_ok());
        PackedTransaction {
            instructions,
            lookup_tables: draft.lookup_tables,
            labels: draft.labels,
            closed_accounts: draft.closed_accounts,
            anchor: None,
            prelude_len,
            has_tip: self.tip.is_some(),
        }
    }
}

/// Compile a v0 transaction with placeholder signatures.
pub fn compile_unsigned(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
    blockhash: Hash,
) -> Result<VersionedTransaction, TransactionBuilderError> {
    let message = v0::Message::try_compile(payer, instructions, lookup_tables, blockhash)
        .map_err(|e| TransactionBuilderError::Configuration(format!("message compile failed: {e}")))?;
    let signers = usize::from(message.header.num_required_signatures);
    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); signers],
        message: VersionedMessage::V0(message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::instructions::{is_compute_budget, is_tip_transfer};
    use solana_sdk::instruction::AccountMeta;

    fn config() -> PackingConfig {
        PackingConfig::default()
    }

    fn fat_ix(data_len: usize) -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &vec![7u8; data_len],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        )
    }

    #[test]
    fn test_every_transaction_has_frame() {
        let payer = Pubkey::new_unique();
        let tip = TipConfig {
            account: Pubkey::new_unique(),
            lamports: 10_000,
        };
        let packer = TransactionPacker::new(payer, &config(), Some(tip));
        let items = (0..30).map(|_| PackItem::Instruction(fat_ix(100))).collect();

        let result = packer.pack(items);
        assert!(result.oversized.is_empty());
        assert!(result.transactions.len() > 1);
        for tx in &result.transactions {
            assert!(is_compute_budget(&tx.instructions[0]));
            assert!(is_compute_budget(&tx.instructions[1]));
            let tips = tx
                .instructions
                .iter()
                .filter(|ix| is_tip_transfer(ix, &[tip.account]))
                .count();
            assert_eq!(tips, 1);
            assert!(is_tip_transfer(tx.instructions.last().unwrap(), &[tip.account]));
            let footprint = packer.footprint(tx.body(), &tx.lookup_tables).unwrap();
            assert!(footprint.bytes <= packer.byte_ceiling());
        }
        let total: usize = result.transactions.iter().map(|tx| tx.body().len()).sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn test_oversized_group_is_reported_not_fatal() {
        let packer = TransactionPacker::new(Pubkey::new_unique(), &config(), None);
        let result = packer.pack(vec![
            PackItem::Instruction(fat_ix(10)),
            PackItem::Group {
                label: "huge".into(),
                instructions: vec![fat_ix(2_000)],
                lookup_tables: vec![],
            },
            PackItem::Instruction(fat_ix(10)),
        ]);
        assert_eq!(result.oversized.len(), 1);
        assert_eq!(result.oversized[0].label.as_deref(), Some("huge"));
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].body().len(), 2);
    }

    #[test]
    fn test_group_is_never_split() {
        let packer = TransactionPacker::new(Pubkey::new_unique(), &config(), None);
        let group: Vec<Instruction> = (0..4).map(|_| fat_ix(150)).collect();
        let result = packer.pack(vec![
            PackItem::Instruction(fat_ix(400)),
            PackItem::Group {
                label: "swap".into(),
                instructions: group.clone(),
                lookup_tables: vec![],
            },
        ]);
        assert_eq!(result.transactions.len(), 2);
        assert_eq!(result.transactions[1].body(), group.as_slice());
        assert_eq!(result.transactions[1].labels, vec!["swap".to_string()]);
    }

    #[test]
    fn test_close_batch_is_split_across_transactions() {
        let owner = Pubkey::new_unique();
        let mut cfg = config();
        cfg.max_accounts = 12;
        let packer = TransactionPacker::new(owner, &cfg, None);
        let accounts: Vec<Pubkey> = (0..25).map(|_| Pubkey::new_unique()).collect();

        let result = packer.pack(vec![PackItem::CloseBatch {
            label: "close".into(),
            accounts: accounts.clone(),
            owner,
        }]);

        assert!(result.oversized.is_empty());
        assert!(result.transactions.len() >= 3);
        let closed: Vec<Pubkey> = result
            .transactions
            .iter()
            .flat_map(|tx| tx.closed_accounts.iter().copied())
            .collect();
        assert_eq!(closed, accounts);
        for tx in &result.transactions {
            assert_eq!(tx.labels, vec!["close".to_string()]);
            let footprint = packer.footprint(tx.body(), &tx.lookup_tables).unwrap();
            assert!(footprint.accounts <= 12);
        }
    }

    #[test]
    fn test_lookup_tables_shrink_footprint() {
        let payer = Pubkey::new_unique();
        let packer = TransactionPacker::new(payer, &config(), None);
        let program = Pubkey::new_unique();
        let keys: Vec<Pubkey> = (0..20).map(|_| Pubkey::new_unique()).collect();
        let ix = Instruction::new_with_bytes(
            program,
            &[1],
            keys.iter().map(|k| AccountMeta::new_readonly(*k, false)).collect(),
        );
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: keys.clone(),
        };

        let without = packer.footprint(std::slice::from_ref(&ix), &[]).unwrap();
        let with = packer.footprint(std::slice::from_ref(&ix), &[table]).unwrap();
        assert!(with.bytes < without.bytes);
        assert_eq!(with.accounts, without.accounts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_staleness() {
        let payer = Pubkey::new_unique();
        let packer = TransactionPacker::new(payer, &config(), None);
        let mut tx = packer.pack(vec![PackItem::Instruction(fat_ix(8))]).transactions.remove(0);
        assert!(tx.is_stale(Duration::from_secs(60)));

        let compiled = tx.compile(&payer, Hash::new_unique()).unwrap();
        assert_eq!(compiled.signatures.len(), 1);
        assert!(!tx.is_stale(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(tx.is_stale(Duration::from_secs(60)));
    }
}
