//! Structured logging for lock-in events

use solana_sdk::pubkey::Pubkey;

use crate::observability::CorrelationId;

/// Emits the pipeline's per-holding and per-unit events with the action's
/// context id attached.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
}

impl StructuredLogger {
    pub fn new(context_id: String) -> Self {
        Self { context_id }
    }

    pub fn for_correlation(id: &CorrelationId) -> Self {
        Self::new(id.as_str().to_string())
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_stage(&self, stage: &str, items: usize) {
        tracing::info!(
            context_id = %self.context_id,
            stage = %stage,
            items = %items,
            "Stage started"
        );
    }

    pub fn log_holding_enriched(&self, mint: &Pubkey, symbol: &str, usd_value: f64, swappable: bool) {
        tracing::debug!(
            context_id = %self.context_id,
            mint = %mint,
            symbol = %symbol,
            usd_value = %usd_value,
            swappable = %swappable,
            "Holding enriched"
        );
    }

    pub fn log_holding_dropped(&self, mint: &Pubkey, token_account: &Pubkey, reason: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            mint = %mint,
            token_account = %token_account,
            reason = %reason,
            "Holding dropped from enrichment"
        );
    }

    pub fn log_instructions_built(&self, token_account: &Pubkey, mint: &Pubkey, instructions: usize, lookup_tables: usize) {
        tracing::debug!(
            context_id = %self.context_id,
            token_account = %token_account,
            mint = %mint,
            instructions = %instructions,
            lookup_tables = %lookup_tables,
            "Instructions built"
        );
    }

    pub fn log_build_failure(&self, token_account: &Pubkey, mint: &Pubkey, reason: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            token_account = %token_account,
            mint = %mint,
            reason = %reason,
            "Instruction build failed"
        );
    }

    pub fn log_pack(&self, transactions: usize, oversized: usize) {
        tracing::info!(
            context_id = %self.context_id,
            transactions = %transactions,
            oversized = %oversized,
            "Transactions packed"
        );
    }

    pub fn log_submission(&self, unit: usize, id: &str, tx_count: usize) {
        tracing::info!(
            context_id = %self.context_id,
            unit = %unit,
            id = %id,
            tx_count = %tx_count,
            "Unit submitted"
        );
    }

    pub fn log_submission_failure(&self, unit: usize, error: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            unit = %unit,
            error = %error,
            "Unit submission failed"
        );
    }

    pub fn log_outcome(&self, unit: usize, outcome: &str, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            unit = %unit,
            outcome = %outcome,
            latency_ms = %latency_ms,
            "Unit settled"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            message = %message,
            "Warning"
        );
    }
}
