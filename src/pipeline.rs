//! Lock-in pipeline
//!
//! Wires enrichment, building, packing, signing, submission and confirmation
//! into the two actions the tool offers: `scan` a wallet and `lock_in` a
//! selection. Every selected holding comes back with a status.

use futures::future::join_all;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

use crate::config::{Config, RelayMode};
use crate::fetch::{FetchError, FetchLayer};
use crate::holdings::{partition, Enricher, EnrichmentReport, Partition, SelectionSet};
use crate::metrics::{Metrics, Timer};
use crate::observability::TraceContext;
use crate::services::metadata::TokenRegistry;
use crate::services::Services;
use crate::structured_logging::StructuredLogger;
use crate::submit::{
    ConfirmationPoller, SubmissionCoordinator, SubmissionOutcome, SubmitError, SubmitOutcome,
    SubmittedUnit, UnitStatus,
};
use crate::tx_builder::{
    BuildOutput, BuilderSettings, InstructionBuilder, PackResult, TipConfig, TransactionPacker,
    CLOSE_BATCH_LABEL,
};
use crate::wallet::WalletSigner;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to enumerate token accounts: {0}")]
    Enumeration(FetchError),

    #[error("Failed to fetch relay tip accounts: {0}")]
    TipAccounts(FetchError),

    #[error("Relay returned no tip accounts")]
    NoTipAccount,

    #[error("Submission failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Final status of one selected holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HoldingStatus {
    /// Quote, swap payload or lookup tables could not be built
    BuildFailed(String),
    /// Its instructions cannot fit a transaction on their own
    Oversized(String),
    /// The wallet cannot sign
    NotReady(String),
    /// The user declined to sign or the action was cancelled before its unit went out
    Cancelled,
    Outcome(SubmissionOutcome),
}

impl HoldingStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Outcome(outcome) if outcome.is_success())
    }
}

impl std::fmt::Display for HoldingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuildFailed(reason) => write!(f, "build failed: {reason}"),
            Self::Oversized(reason) => write!(f, "oversized: {reason}"),
            Self::NotReady(reason) => write!(f, "wallet not ready: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Outcome(outcome) => write!(f, "{outcome}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingOutcome {
    #[serde(serialize_with = "serialize_pubkey")]
    pub token_account: Pubkey,
    #[serde(serialize_with = "serialize_pubkey")]
    pub mint: Pubkey,
    pub status: HoldingStatus,
}

fn serialize_pubkey<S: serde::Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Summary {
    NothingToDo,
    FullSuccess,
    Partial { succeeded: usize, failed: usize },
    TotalFailure,
    Cancelled,
}

impl Summary {
    fn from_outcomes(outcomes: &[HoldingOutcome]) -> Self {
        if outcomes.is_empty() {
            return Self::NothingToDo;
        }
        if outcomes.iter().all(|o| o.status == HoldingStatus::Cancelled) {
            return Self::Cancelled;
        }
        let succeeded = outcomes.iter().filter(|o| o.status.is_success()).count();
        let failed = outcomes.len() - succeeded;
        match (succeeded, failed) {
            (_, 0) => Self::FullSuccess,
            (0, _) => Self::TotalFailure,
            (succeeded, failed) => Self::Partial { succeeded, failed },
        }
    }
}

/// Everything a lock-in action did, one status per selected holding.
#[derive(Debug, Clone)]
pub struct LockInReport {
    pub correlation_id: String,
    /// In selection order
    pub outcomes: Vec<HoldingOutcome>,
    /// Token accounts swapped or closed by a unit that landed
    pub closed_accounts: BTreeSet<Pubkey>,
    pub transactions: usize,
    pub units: usize,
    pub summary: Summary,
}

/// Built and packed, not yet signed.
#[derive(Debug, Clone)]
pub struct LockInPlan {
    pub owner: Pubkey,
    pub build: BuildOutput,
    pub pack: PackResult,
}

pub struct LockInPipeline {
    services: Services,
    wallet: Arc<dyn WalletSigner>,
    fetch: Arc<FetchLayer>,
    metrics: Arc<Metrics>,
    registry: Arc<TokenRegistry>,
    config: Config,
    target_mint: Pubkey,
    cancel: watch::Receiver<bool>,
}

impl LockInPipeline {
    pub fn new(
        services: Services,
        wallet: Arc<dyn WalletSigner>,
        fetch: Arc<FetchLayer>,
        metrics: Arc<Metrics>,
        config: Config,
    ) -> Result<Self, PipelineError> {
        let target_mint = config
            .swap
            .target_mint()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let mut registry = TokenRegistry::with_defaults();
        registry.extend(config.registry.iter().cloned());
        let (_, cancel) = watch::channel(false);
        Ok(Self {
            services,
            wallet,
            fetch,
            metrics,
            registry: Arc::new(registry),
            config,
            target_mint,
            cancel,
        })
    }

    /// Stop issuing new units once the sender flips to `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn target_mint(&self) -> &Pubkey {
        &self.target_mint
    }

    pub fn enricher(&self) -> Enricher {
        Enricher::new(
            self.services.clone(),
            self.fetch.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.target_mint,
            self.config.swap.probe_slippage_bps,
            self.config.enrich.concurrency,
        )
    }

    /// Enumerate and enrich `owner`'s holdings, then partition them.
    pub async fn scan(&self, owner: &Pubkey) -> Result<(EnrichmentReport, Partition), PipelineError> {
        let trace = TraceContext::new("scan");
        let logger = StructuredLogger::for_correlation(trace.correlation_id());
        async {
            let enricher = self.enricher();
            let entries = enricher.enumerate(owner).await.map_err(PipelineError::Enumeration)?;
            logger.log_stage("enumerate", entries.len());

            let report = enricher.enrich(entries, &logger).await;
            let parts = partition(&report.holdings, &self.target_mint);
            info!(
                convertible = parts.convertible.len(),
                closable = parts.closable.len(),
                ignored = parts.ignored.len(),
                elapsed_ms = trace.elapsed_ms(),
                "Scan complete"
            );
            Ok((report, parts))
        }
        .instrument(trace.span())
        .await
    }

    /// Build and pack the selection without signing anything. `None` when
    /// the wallet has no public key.
    pub async fn plan(
        &self,
        selection: &SelectionSet,
        logger: &StructuredLogger,
    ) -> Result<Option<LockInPlan>, PipelineError> {
        let Some(owner) = self.wallet.public_key() else {
            return Ok(None);
        };
        let settings = BuilderSettings::from_config(owner, &self.config.swap)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let tip = self.tip_config().await?;

        let builder = InstructionBuilder::new(
            self.services.clone(),
            self.fetch.clone(),
            self.metrics.clone(),
            settings,
        );
        let build = builder.build(selection, logger).await;

        logger.log_stage("pack", build.swaps.len() + build.closes.len());
        let packer = TransactionPacker::new(owner, &self.config.packing, tip);
        let pack = packer.pack(build.pack_items(owner));
        self.metrics.transactions_packed.inc_by(pack.transactions.len() as u64);
        self.metrics.oversized_items.inc_by(pack.oversized.len() as u64);
        logger.log_pack(pack.transactions.len(), pack.oversized.len());

        Ok(Some(LockInPlan { owner, build, pack }))
    }

    async fn tip_config(&self) -> Result<Option<TipConfig>, PipelineError> {
        if self.config.relay.mode != RelayMode::Bundle {
            return Ok(None);
        }
        let relay = &self.services.relay;
        let accounts = self
            .fetch
            .schedule_api("tip_accounts", move || relay.tip_accounts())
            .await
            .map_err(PipelineError::TipAccounts)?;
        if accounts.is_empty() {
            return Err(PipelineError::NoTipAccount);
        }
        Ok(Some(TipConfig {
            account: accounts[fastrand::usize(..accounts.len())],
            lamports: self.config.relay.tip_lamports,
        }))
    }

    /// Convert the selection into the target token and close empty accounts.
    pub async fn lock_in(&self, selection: &SelectionSet) -> Result<LockInReport, PipelineError> {
        let trace = TraceContext::new("lock_in");
        let logger = StructuredLogger::for_correlation(trace.correlation_id());
        let span = trace.span();
        self.run_lock_in(selection, &trace, &logger).instrument(span).await
    }

    async fn run_lock_in(
        &self,
        selection: &SelectionSet,
        trace: &TraceContext,
        logger: &StructuredLogger,
    ) -> Result<LockInReport, PipelineError> {
        let mut report = LockInReport {
            correlation_id: logger.context_id().to_string(),
            outcomes: Vec::new(),
            closed_accounts: BTreeSet::new(),
            transactions: 0,
            units: 0,
            summary: Summary::NothingToDo,
        };
        if selection.is_empty() {
            return Ok(report);
        }

        let not_ready = match self.wallet.public_key() {
            None => Some("wallet not connected"),
            Some(_) if !self.wallet.can_sign_all() => Some("wallet cannot sign batches"),
            Some(_) => None,
        };
        let plan = match not_ready {
            Some(_) => None,
            None => {
                self.plan(selection, logger)
                    .instrument(trace.child_span("plan").span())
                    .await?
            }
        };
        let Some(plan) = plan else {
            let reason = not_ready.unwrap_or("wallet not connected");
            logger.warn(reason);
            report.outcomes = uniform(selection, HoldingStatus::NotReady(reason.to_string()));
            report.summary = Summary::from_outcomes(&report.outcomes);
            return Ok(report);
        };
        report.transactions = plan.pack.transactions.len();

        let coordinator = SubmissionCoordinator::new(
            self.services.chain.clone(),
            self.services.relay.clone(),
            self.wallet.clone(),
            self.fetch.clone(),
            self.metrics.clone(),
            self.config.relay.clone(),
        );
        let submitted = coordinator
            .submit(plan.pack.transactions.clone(), &self.cancel, logger)
            .instrument(trace.child_span("submit").span())
            .await?;

        let mut statuses = UnitStatuses::default();
        match submitted {
            SubmitOutcome::NotReady(reason) => {
                statuses.fallback = Some(HoldingStatus::NotReady(reason));
            }
            SubmitOutcome::Cancelled => statuses.fallback = Some(HoldingStatus::Cancelled),
            SubmitOutcome::Submitted(units) => {
                report.units = units.len();
                let settled = self
                    .confirm(units, logger)
                    .instrument(trace.child_span("confirm").span())
                    .await;
                for (unit, status) in &settled {
                    statuses.record(unit, status);
                }
                report.closed_accounts = settled_accounts(&plan.build, &settled);
            }
        }

        report.outcomes = account_for(selection, &plan, &statuses);
        report.summary = Summary::from_outcomes(&report.outcomes);
        info!(
            summary = ?report.summary,
            transactions = report.transactions,
            units = report.units,
            closed = report.closed_accounts.len(),
            elapsed_ms = trace.elapsed_ms(),
            "Lock-in complete"
        );
        Ok(report)
    }

    /// Poll every submitted unit concurrently. Each task only returns its
    /// outcome; results come back in unit order.
    async fn confirm(
        &self,
        units: Vec<SubmittedUnit>,
        logger: &StructuredLogger,
    ) -> Vec<(SubmittedUnit, HoldingStatus)> {
        let in_flight = units
            .iter()
            .filter(|u| matches!(u.status, UnitStatus::Submitted(_)))
            .count();
        logger.log_stage("confirm", in_flight);

        let poller = ConfirmationPoller::new(
            self.services.chain.clone(),
            self.services.relay.clone(),
            self.fetch.clone(),
            self.metrics.clone(),
            &self.config.poll,
        );
        let poller = &poller;

        let tasks = units.into_iter().map(|unit| async move {
            let status = match &unit.status {
                UnitStatus::Submitted(id) => {
                    self.metrics.units_in_flight.inc();
                    let timer = Timer::new();
                    let outcome = poller.poll(id).await;
                    self.metrics.units_in_flight.dec();
                    self.metrics.record_outcome(outcome.label());
                    logger.log_outcome(unit.index, outcome.label(), (timer.elapsed_secs() * 1_000.0) as u64);
                    HoldingStatus::Outcome(outcome)
                }
                UnitStatus::Failed(reason) => {
                    let outcome = SubmissionOutcome::Rejected(reason.clone());
                    self.metrics.record_outcome(outcome.label());
                    HoldingStatus::Outcome(outcome)
                }
                UnitStatus::Stale => {
                    let outcome = SubmissionOutcome::Rejected("stale blockhash".to_string());
                    self.metrics.record_outcome(outcome.label());
                    HoldingStatus::Outcome(outcome)
                }
                UnitStatus::NotSent => HoldingStatus::Cancelled,
            };
            (unit, status)
        });
        join_all(tasks).await
    }
}

/// Per-label and per-close-account statuses gathered from settled units.
#[derive(Default)]
struct UnitStatuses {
    by_label: HashMap<String, HoldingStatus>,
    by_close_account: HashMap<Pubkey, HoldingStatus>,
    /// Applies to every packed holding when nothing was submitted
    fallback: Option<HoldingStatus>,
}

impl UnitStatuses {
    fn record(&mut self, unit: &SubmittedUnit, status: &HoldingStatus) {
        for label in unit.labels().filter(|l| l.as_str() != CLOSE_BATCH_LABEL) {
            self.by_label.insert(label.clone(), status.clone());
        }
        for account in unit.closed_accounts() {
            self.by_close_account.insert(*account, status.clone());
        }
    }
}

/// Union of the token accounts touched by landed units. Runs after every
/// unit settled, as the only writer of the set.
fn settled_accounts(build: &BuildOutput, settled: &[(SubmittedUnit, HoldingStatus)]) -> BTreeSet<Pubkey> {
    let by_label: HashMap<String, Pubkey> = build
        .swaps
        .iter()
        .map(|swap| (swap.label(), swap.holding.token_account))
        .collect();

    settled
        .iter()
        .filter(|(_, status)| status.is_success())
        .fold(BTreeSet::new(), |mut accounts, (unit, _)| {
            accounts.extend(unit.labels().filter_map(|label| by_label.get(label).copied()));
            accounts.extend(unit.closed_accounts().copied());
            accounts
        })
}

fn uniform(selection: &SelectionSet, status: HoldingStatus) -> Vec<HoldingOutcome> {
    selection
        .holdings()
        .iter()
        .map(|h| HoldingOutcome {
            token_account: h.token_account,
            mint: h.mint,
            status: status.clone(),
        })
        .collect()
}

/// One status per selected holding, in selection order.
fn account_for(selection: &SelectionSet, plan: &LockInPlan, statuses: &UnitStatuses) -> Vec<HoldingOutcome> {
    let failures: HashMap<Pubkey, String> = plan
        .build
        .failures
        .iter()
        .map(|f| (f.holding.token_account, f.reason.to_string()))
        .collect();
    let mut oversized_labels = HashMap::new();
    let mut oversized_closes = HashMap::new();
    for item in &plan.pack.oversized {
        match (item.close_account, &item.label) {
            (Some(account), _) => {
                oversized_closes.insert(account, item.reason.clone());
            }
            (None, Some(label)) => {
                oversized_labels.insert(label.clone(), item.reason.clone());
            }
            (None, None) => {}
        }
    }

    selection
        .holdings()
        .iter()
        .map(|holding| {
            let account = holding.token_account;
            let label = account.to_string();
            let status = if let Some(reason) = failures.get(&account) {
                HoldingStatus::BuildFailed(reason.clone())
            } else if let Some(reason) = oversized_labels.get(&label).or(oversized_closes.get(&account)) {
                HoldingStatus::Oversized(reason.clone())
            } else if let Some(status) = statuses.fallback.clone() {
                status
            } else if let Some(status) = statuses
                .by_label
                .get(&label)
                .or(statuses.by_close_account.get(&account))
            {
                status.clone()
            } else {
                warn!(token_account = %account, "Holding missing from every packed transaction");
                HoldingStatus::BuildFailed("not packed".to_string())
            };
            HoldingOutcome {
                token_account: account,
                mint: holding.mint,
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: HoldingStatus) -> HoldingOutcome {
        HoldingOutcome {
            token_account: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            status,
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(Summary::from_outcomes(&[]), Summary::NothingToDo);

        let ok = || outcome(HoldingStatus::Outcome(SubmissionOutcome::Finalized));
        let bad = || outcome(HoldingStatus::Outcome(SubmissionOutcome::Dropped));
        assert_eq!(Summary::from_outcomes(&[ok(), ok()]), Summary::FullSuccess);
        assert_eq!(Summary::from_outcomes(&[bad()]), Summary::TotalFailure);
        assert_eq!(
            Summary::from_outcomes(&[ok(), bad(), outcome(HoldingStatus::Oversized("big".into()))]),
            Summary::Partial {
                succeeded: 1,
                failed: 2
            }
        );
        assert_eq!(
            Summary::from_outcomes(&[outcome(HoldingStatus::Cancelled)]),
            Summary::Cancelled
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            HoldingStatus::Outcome(SubmissionOutcome::Accepted).to_string(),
            "accepted"
        );
        assert_eq!(HoldingStatus::Cancelled.to_string(), "cancelled");
    }
}
