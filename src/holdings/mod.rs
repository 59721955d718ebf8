//! Holdings: the enriched view of a wallet's token accounts, their
//! classification and the user's selection.

pub mod enrich;

pub use enrich::{Enricher, EnrichmentReport};

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use thiserror::Error;

use crate::rpc::TokenAccountEntry;
use crate::services::metadata::MetadataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HoldingKind {
    Fungible,
    NonFungible,
}

/// One token account of the wallet after enrichment. Never mutated once
/// built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub mint: Pubkey,
    pub token_account: Pubkey,
    pub raw_amount: u64,
    pub decimals: u8,
    pub kind: HoldingKind,
    pub name: String,
    pub symbol: String,
    pub image: Option<String>,
    pub usd_value: f64,
    /// A route to the target mint exists (always true for the target itself)
    pub swappable: bool,
    pub metadata_source: MetadataSource,
    pub collection: Option<Pubkey>,
}

impl Holding {
    /// Human amount, `raw_amount / 10^decimals`.
    pub fn ui_amount(&self) -> f64 {
        self.raw_amount as f64 / 10f64.powi(i32::from(self.decimals))
    }

    /// Short label used in logs and pack results.
    pub fn label(&self) -> String {
        format!("{}:{}", self.symbol, self.token_account)
    }
}

/// Why a holding is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IgnoreReason {
    TargetMint,
    NonFungible,
    NoRoute,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetMint => write!(f, "target token"),
            Self::NonFungible => write!(f, "non-fungible"),
            Self::NoRoute => write!(f, "no route"),
        }
    }
}

/// Disjoint split of the enriched holdings.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub convertible: Vec<Holding>,
    pub closable: Vec<Holding>,
    pub ignored: Vec<(Holding, IgnoreReason)>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.convertible.len() + self.closable.len() + self.ignored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classify every holding into exactly one bucket. Rules apply in order:
/// target mint, empty balance, non-fungible, routable, otherwise no route.
pub fn partition(holdings: &[Holding], target_mint: &Pubkey) -> Partition {
    let mut out = Partition::default();
    for holding in holdings {
        if holding.mint == *target_mint {
            out.ignored.push((holding.clone(), IgnoreReason::TargetMint));
        } else if holding.raw_amount == 0 {
            out.closable.push(holding.clone());
        } else if holding.kind == HoldingKind::NonFungible {
            out.ignored.push((holding.clone(), IgnoreReason::NonFungible));
        } else if holding.swappable {
            out.convertible.push(holding.clone());
        } else {
            out.ignored.push((holding.clone(), IgnoreReason::NoRoute));
        }
    }
    out
}

/// Collapse repeated token-account entries from enumeration, keeping the
/// first occurrence and the enumeration order.
pub fn dedupe_entries(entries: Vec<TokenAccountEntry>) -> Vec<TokenAccountEntry> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.address))
        .collect()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("cannot lock in the target token itself")]
    TargetMint,
}

/// Holdings chosen for conversion, keyed by token account, in the order
/// they were selected.
#[derive(Debug, Clone)]
pub struct SelectionSet {
    target_mint: Pubkey,
    holdings: Vec<Holding>,
}

impl SelectionSet {
    pub fn new(target_mint: Pubkey) -> Self {
        Self {
            target_mint,
            holdings: Vec::new(),
        }
    }

    /// Add a holding; `Ok(false)` when its token account is already selected.
    pub fn insert(&mut self, holding: Holding) -> Result<bool, SelectionError> {
        if holding.mint == self.target_mint {
            return Err(SelectionError::TargetMint);
        }
        if self.contains(&holding.token_account) {
            return Ok(false);
        }
        self.holdings.push(holding);
        Ok(true)
    }

    pub fn remove(&mut self, token_account: &Pubkey) -> Option<Holding> {
        let index = self
            .holdings
            .iter()
            .position(|h| h.token_account == *token_account)?;
        Some(self.holdings.remove(index))
    }

    pub fn contains(&self, token_account: &Pubkey) -> bool {
        self.holdings.iter().any(|h| h.token_account == *token_account)
    }

    pub fn target_mint(&self) -> &Pubkey {
        &self.target_mint
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::holding;

    #[test]
    fn test_ui_amount() {
        let h = holding(Pubkey::new_unique(), 1_500_000, 6);
        assert!((h.ui_amount() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partition_rules_in_order() {
        let target = Pubkey::new_unique();

        let mut target_holding = holding(target, 0, 6);
        target_holding.swappable = true;
        let empty = holding(Pubkey::new_unique(), 0, 6);
        let mut nft = holding(Pubkey::new_unique(), 1, 0);
        nft.kind = HoldingKind::NonFungible;
        let mut routable = holding(Pubkey::new_unique(), 10, 6);
        routable.swappable = true;
        let unroutable = holding(Pubkey::new_unique(), 10, 6);
        let mut empty_nft = holding(Pubkey::new_unique(), 0, 0);
        empty_nft.kind = HoldingKind::NonFungible;

        let all = vec![
            target_holding.clone(),
            empty.clone(),
            nft.clone(),
            routable.clone(),
            unroutable.clone(),
            empty_nft.clone(),
        ];
        let parts = partition(&all, &target);

        assert_eq!(parts.len(), all.len());
        assert_eq!(parts.convertible, vec![routable]);
        assert_eq!(parts.closable, vec![empty, empty_nft]);
        assert_eq!(
            parts.ignored,
            vec![
                (target_holding, IgnoreReason::TargetMint),
                (nft, IgnoreReason::NonFungible),
                (unroutable, IgnoreReason::NoRoute),
            ]
        );
    }

    #[test]
    fn test_selection_rejects_target() {
        let target = Pubkey::new_unique();
        let mut selection = SelectionSet::new(target);
        assert_eq!(
            selection.insert(holding(target, 5, 6)),
            Err(SelectionError::TargetMint)
        );
        assert_eq!(
            SelectionError::TargetMint.to_string(),
            "cannot lock in the target token itself"
        );
        assert!(selection.is_empty());
    }

    #[test]
    fn test_selection_duplicate_is_noop() {
        let mut selection = SelectionSet::new(Pubkey::new_unique());
        let h = holding(Pubkey::new_unique(), 5, 6);
        assert_eq!(selection.insert(h.clone()), Ok(true));
        assert_eq!(selection.insert(h.clone()), Ok(false));
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.remove(&h.token_account), Some(h.clone()));
        assert!(!selection.contains(&h.token_account));
    }

    #[test]
    fn test_dedupe_entries_keeps_first() {
        let mint = Pubkey::new_unique();
        let a = TokenAccountEntry {
            address: Pubkey::new_unique(),
            mint,
            raw_amount: 7,
            decimals: 0,
        };
        let b = TokenAccountEntry {
            address: Pubkey::new_unique(),
            mint,
            raw_amount: 3,
            decimals: 0,
        };
        let out = dedupe_entries(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(out, vec![a, b]);
        assert_eq!(out.iter().map(|e| e.raw_amount).sum::<u64>(), 10);
    }
}
