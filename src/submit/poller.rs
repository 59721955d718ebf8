//! Confirmation poller for bundles and signatures.

use serde_json::Value;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::outcome::{SubmissionOutcome, UnitId};
use crate::config::PollConfig;
use crate::fetch::FetchLayer;
use crate::metrics::{Metrics, Timer};
use crate::rpc::{ChainRpc, ConfirmationLevel, SignatureState};
use crate::services::{BundleStatusEntry, InflightStatus, Relay};

/// The relay reports success as an absent or null `err`, or `{"Ok": null}`.
fn bundle_err_is_success(err: Option<&Value>) -> bool {
    match err {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.len() == 1 && map.get("Ok").is_some_and(Value::is_null),
        Some(_) => false,
    }
}

/// Outcome implied by one bundle status entry; `Pending` when not final.
pub fn interpret_bundle_status(entry: &BundleStatusEntry) -> SubmissionOutcome {
    if !bundle_err_is_success(entry.err.as_ref()) {
        let reason = entry
            .err
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        return SubmissionOutcome::Rejected(reason);
    }
    match entry.confirmation {
        Some(ConfirmationLevel::Finalized) => SubmissionOutcome::Finalized,
        Some(ConfirmationLevel::Confirmed) => SubmissionOutcome::Accepted,
        Some(ConfirmationLevel::Processed) | None => SubmissionOutcome::Pending,
    }
}

/// Outcome implied by one signature status; `Pending` when not final.
pub fn interpret_signature_status(state: &SignatureState) -> SubmissionOutcome {
    if let Some(err) = &state.err {
        return SubmissionOutcome::Rejected(err.clone());
    }
    match state.confirmation {
        Some(ConfirmationLevel::Finalized) => SubmissionOutcome::Finalized,
        Some(ConfirmationLevel::Confirmed) => SubmissionOutcome::Accepted,
        Some(ConfirmationLevel::Processed) | None => SubmissionOutcome::Pending,
    }
}

pub struct ConfirmationPoller {
    chain: Arc<dyn ChainRpc>,
    relay: Arc<dyn Relay>,
    fetch: Arc<FetchLayer>,
    metrics: Arc<Metrics>,
    interval: Duration,
    max_attempts: u32,
    invalid_grace_attempts: u32,
}

impl ConfirmationPoller {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        relay: Arc<dyn Relay>,
        fetch: Arc<FetchLayer>,
        metrics: Arc<Metrics>,
        config: &PollConfig,
    ) -> Self {
        Self {
            chain,
            relay,
            fetch,
            metrics,
            interval: config.interval(),
            max_attempts: config.max_attempts.max(1),
            invalid_grace_attempts: config.invalid_grace_attempts.max(1),
        }
    }

    pub async fn poll(&self, id: &UnitId) -> SubmissionOutcome {
        match id {
            UnitId::Bundle(bundle_id) => self.poll_bundle(bundle_id).await,
            UnitId::Signature(signature) => self.poll_signature(signature).await,
        }
    }

    /// Poll a bundle until it reaches a terminal state or attempts run out.
    /// Each status query is one limited attempt; the loop is the retry.
    pub async fn poll_bundle(&self, bundle_id: &str) -> SubmissionOutcome {
        let timer = Timer::new();
        let ids = [bundle_id.to_string()];
        let ids = &ids[..];
        let relay = &self.relay;
        let mut invalid_streak = 0u32;

        for attempt in 1..=self.max_attempts {
            let outcome = match self
                .fetch
                .once_api("bundle_statuses", relay.bundle_statuses(ids))
                .await
            {
                Ok(statuses) => match statuses.into_iter().next().flatten() {
                    Some(entry) => {
                        invalid_streak = 0;
                        interpret_bundle_status(&entry)
                    }
                    None => self.inflight_outcome(ids, &mut invalid_streak).await,
                },
                Err(e) => {
                    debug!(bundle_id, attempt, error = %e, "Bundle status query failed");
                    SubmissionOutcome::Pending
                }
            };

            if outcome.is_terminal() {
                debug!(bundle_id, attempt, outcome = %outcome, "Bundle settled");
                timer.observe_duration(&self.metrics.confirm_latency);
                return outcome;
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        SubmissionOutcome::TimedOut
    }

    async fn inflight_outcome(&self, ids: &[String], invalid_streak: &mut u32) -> SubmissionOutcome {
        let relay = &self.relay;
        let status = self
            .fetch
            .once_api("inflight_bundle_statuses", relay.inflight_bundle_statuses(ids))
            .await
            .ok()
            .and_then(|statuses| statuses.into_iter().next().flatten());

        match status {
            Some(InflightStatus::Invalid) => {
                *invalid_streak += 1;
                if *invalid_streak >= self.invalid_grace_attempts {
                    SubmissionOutcome::Dropped
                } else {
                    SubmissionOutcome::Pending
                }
            }
            Some(InflightStatus::Failed) => {
                SubmissionOutcome::Rejected("bundle failed in block engine".to_string())
            }
            Some(InflightStatus::Landed) => SubmissionOutcome::Accepted,
            Some(InflightStatus::Pending) | None => {
                *invalid_streak = 0;
                SubmissionOutcome::Pending
            }
        }
    }

    /// Poll one signature until it reaches a terminal state or attempts run out.
    pub async fn poll_signature(&self, signature: &Signature) -> SubmissionOutcome {
        let timer = Timer::new();
        let signatures = [*signature];
        let signatures = &signatures[..];
        let chain = &self.chain;

        for attempt in 1..=self.max_attempts {
            let outcome = match self
                .fetch
                .once_rpc("signature_statuses", chain.signature_statuses(signatures))
                .await
            {
                Ok(statuses) => statuses
                    .into_iter()
                    .next()
                    .flatten()
                    .map(|state| interpret_signature_status(&state))
                    .unwrap_or(SubmissionOutcome::Pending),
                Err(e) => {
                    debug!(%signature, attempt, error = %e, "Signature status query failed");
                    SubmissionOutcome::Pending
                }
            };

            if outcome.is_terminal() {
                timer.observe_duration(&self.metrics.confirm_latency);
                return outcome;
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        SubmissionOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(confirmation: Option<ConfirmationLevel>, err: Option<Value>) -> BundleStatusEntry {
        BundleStatusEntry {
            bundle_id: "b".into(),
            confirmation,
            err,
            slot: Some(1),
        }
    }

    #[test]
    fn test_bundle_err_shapes() {
        assert!(bundle_err_is_success(None));
        assert!(bundle_err_is_success(Some(&Value::Null)));
        assert!(bundle_err_is_success(Some(&json!({"Ok": null}))));
        assert!(!bundle_err_is_success(Some(&json!({"Err": {"InstructionError": [0, "Custom"]}}))));
        assert!(!bundle_err_is_success(Some(&json!("failed"))));
    }

    #[test]
    fn test_interpret_bundle_status() {
        assert_eq!(
            interpret_bundle_status(&entry(Some(ConfirmationLevel::Finalized), Some(json!({"Ok": null})))),
            SubmissionOutcome::Finalized
        );
        assert_eq!(
            interpret_bundle_status(&entry(Some(ConfirmationLevel::Confirmed), None)),
            SubmissionOutcome::Accepted
        );
        assert_eq!(
            interpret_bundle_status(&entry(Some(ConfirmationLevel::Processed), None)),
            SubmissionOutcome::Pending
        );
        assert!(matches!(
            interpret_bundle_status(&entry(Some(ConfirmationLevel::Confirmed), Some(json!({"Err": 1})))),
            SubmissionOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_interpret_signature_status() {
        let state = |confirmation, err: Option<&str>| SignatureState {
            confirmation,
            err: err.map(str::to_string),
        };
        assert_eq!(
            interpret_signature_status(&state(Some(ConfirmationLevel::Confirmed), None)),
            SubmissionOutcome::Accepted
        );
        assert_eq!(
            interpret_signature_status(&state(Some(ConfirmationLevel::Processed), None)),
            SubmissionOutcome::Pending
        );
        assert_eq!(
            interpret_signature_status(&state(Some(ConfirmationLevel::Finalized), Some("custom 1"))),
            SubmissionOutcome::Rejected("custom 1".into())
        );
    }
}
