//! Error types for instruction building and packing
//!
//! Every failure here is scoped to a single holding: the builder turns it
//! into a `BuildFailure` and keeps going with the rest of the selection.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::compat::DecompileError;
use crate::fetch::FetchError;

/// Error type for building one holding's instructions
#[derive(Error, Debug, Clone)]
pub enum TransactionBuilderError {
    /// The aggregator returned no usable quote
    ///
    /// Covers client errors (unsupported mint, amount too small) and routes
    /// that cannot take the amount even after shrinking.
    #[error("Quote failed for {mint}: {reason}")]
    Quote {
        mint: Pubkey,
        reason: String,
    },

    /// The swap payload request failed or could not be decoded
    #[error("Swap payload failed: {0}")]
    SwapPayload(String),

    /// A lookup table referenced by the swap is missing or malformed
    #[error("Lookup table {table}: {reason}")]
    LookupTable {
        table: Pubkey,
        reason: String,
    },

    /// A prebuilt transaction could not be turned back into instructions
    #[error("Decompile failed: {0}")]
    Decompile(#[from] DecompileError),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        program: String,
        reason: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Underlying fetch failure (after retries)
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl TransactionBuilderError {
    /// Whether a later lock-in attempt could succeed for the same holding
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(err) => err.is_retryable(),
            Self::SwapPayload(_) => true,
            Self::LookupTable { .. } => true,

            Self::Quote { .. } => false,
            Self::Decompile(_) => false,
            Self::InstructionBuild { .. } => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Quote { .. } => "quote",
            Self::SwapPayload(_) => "swap",
            Self::LookupTable { .. } => "lookup_table",
            Self::Decompile(_) => "decompile",
            Self::InstructionBuild { .. } => "instruction",
            Self::Configuration(_) => "config",
            Self::Fetch(err) => err.category(),
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    pub fn quote_failed(mint: Pubkey, reason: impl Into<String>) -> Self {
        Self::Quote {
            mint,
            reason: reason.into(),
        }
    }

    pub fn lookup_table(table: Pubkey, reason: impl Into<String>) -> Self {
        Self::LookupTable {
            table,
            reason: reason.into(),
        }
    }

    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::instruction_failed("spl_token", "invalid accounts");
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=spl_token): invalid accounts"
        );

        let mint = Pubkey::new_unique();
        let err = TransactionBuilderError::quote_failed(mint, "no route");
        assert_eq!(err.to_string(), format!("Quote failed for {mint}: no route"));
    }

    #[test]
    fn test_error_retryability() {
        let table = Pubkey::new_unique();
        assert!(TransactionBuilderError::lookup_table(table, "missing").is_retryable());
        assert!(TransactionBuilderError::Fetch(FetchError::Timeout {
            service: "rpc".into()
        })
        .is_retryable());

        assert!(!TransactionBuilderError::quote_failed(table, "x").is_retryable());
        assert!(!TransactionBuilderError::Fetch(FetchError::Decode("bad".into())).is_retryable());
        assert!(!TransactionBuilderError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TransactionBuilderError::quote_failed(Pubkey::new_unique(), "x").category(),
            "quote"
        );
        assert_eq!(
            TransactionBuilderError::Fetch(FetchError::Rpc("x".into())).category(),
            FetchError::Rpc("x".into()).category()
        );
    }
}
