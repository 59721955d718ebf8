//! Transaction building: selected holdings to packed, unsigned transactions.
//!
//! ## Architecture
//!
//! - **errors**: per-holding error taxonomy
//! - **instructions**: compute budget, tip, close and referral helpers plus
//!   the frame check
//! - **builder**: quotes, swap payloads and lookup tables per holding
//! - **packer**: greedy byte- and account-bounded packing into v0
//!   transactions
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # use lockin_sweeper::tx_builder::{InstructionBuilder, TransactionPacker};
//! # use lockin_sweeper::holdings::SelectionSet;
//! # use lockin_sweeper::structured_logging::StructuredLogger;
//! # use solana_sdk::pubkey::Pubkey;
//! # async fn example(builder: InstructionBuilder, packer: TransactionPacker, selection: SelectionSet, owner: Pubkey) {
//! let logger = StructuredLogger::new("example".into());
//! let built = builder.build(&selection, &logger).await;
//! let packed = packer.pack(built.pack_items(owner));
//! for tx in &packed.transactions {
//!     println!("{} instructions for {:?}", tx.instructions.len(), tx.labels);
//! }
//! # }
//! ```

pub mod builder;
pub mod errors;
pub mod instructions;
pub mod packer;

pub use builder::{
    BuildFailure, BuildOutput, BuilderSettings, BuiltSwap, InstructionBuilder, CLOSE_BATCH_LABEL,
};
pub use errors::TransactionBuilderError;
pub use instructions::{
    close_account_instruction, compute_budget_prelude, referral_fee_account, sanity_check_ix_order,
    tip_instruction,
};
pub use packer::{
    compile_unsigned, Anchor, OversizedItem, PackItem, PackResult, PackedTransaction, TipConfig,
    TransactionPacker, TxFootprint,
};
