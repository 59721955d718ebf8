//! Confirmation poller tests on a paused clock

#[cfg(test)]
mod poller_tests {
    use serde_json::json;
    use solana_sdk::signature::Signature;
    use std::time::Duration;

    use crate::config::PollConfig;
    use crate::fetch::{FetchConfig, LimiterConfig};
    use crate::rpc::{ConfirmationLevel, SignatureState};
    use crate::services::InflightStatus;
    use crate::submit::{ConfirmationPoller, SubmissionOutcome, UnitId};
    use crate::test_utils::{ScriptedBundle, TestHarness};

    fn poller(harness: &TestHarness) -> ConfirmationPoller {
        ConfirmationPoller::new(
            harness.chain.clone(),
            harness.relay.clone(),
            harness.fetch.clone(),
            harness.metrics.clone(),
            &harness.config.poll,
        )
    }

    fn status(confirmation: ConfirmationLevel, err: Option<serde_json::Value>) -> ScriptedBundle {
        ScriptedBundle::Status { confirmation, err }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ok_null_sentinel_after_two_polls_is_success() {
        let harness = TestHarness::new();
        harness.relay.script_statuses(vec![
            ScriptedBundle::Unknown,
            status(ConfirmationLevel::Processed, None),
            status(ConfirmationLevel::Confirmed, Some(json!({ "Ok": null }))),
        ]);

        let started = tokio::time::Instant::now();
        let outcome = poller(&harness).poll_bundle("bundle-7").await;

        assert_eq!(outcome, SubmissionOutcome::Accepted);
        assert_eq!(harness.relay.status_calls("bundle-7"), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(4_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalized_with_null_err() {
        let harness = TestHarness::new();
        harness
            .relay
            .script_statuses(vec![status(ConfirmationLevel::Finalized, Some(json!(null)))]);

        let outcome = poller(&harness).poll(&UnitId::Bundle("b".into())).await;
        assert_eq!(outcome, SubmissionOutcome::Finalized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_error_is_rejected() {
        let harness = TestHarness::new();
        harness.relay.script_statuses(vec![status(
            ConfirmationLevel::Confirmed,
            Some(json!({ "Err": { "InstructionError": [1, { "Custom": 6001 }] } })),
        )]);

        let outcome = poller(&harness).poll_bundle("b").await;
        assert!(matches!(outcome, SubmissionOutcome::Rejected(reason) if reason.contains("6001")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_bundle_dropped_after_grace() {
        let harness = TestHarness::new();
        harness.relay.script_statuses(vec![ScriptedBundle::Unknown]);
        harness.relay.script_inflight(vec![Some(InflightStatus::Invalid)]);

        let outcome = poller(&harness).poll_bundle("b").await;

        assert_eq!(outcome, SubmissionOutcome::Dropped);
        assert_eq!(
            harness.relay.status_calls("b") as u32,
            harness.config.poll.invalid_grace_attempts
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_resets_invalid_streak() {
        let harness = TestHarness::new();
        harness.relay.script_statuses(vec![ScriptedBundle::Unknown]);
        harness.relay.script_inflight(vec![
            Some(InflightStatus::Invalid),
            Some(InflightStatus::Invalid),
            Some(InflightStatus::Pending),
            Some(InflightStatus::Invalid),
            Some(InflightStatus::Landed),
        ]);

        let outcome = poller(&harness).poll_bundle("b").await;
        assert_eq!(outcome, SubmissionOutcome::Accepted);
        assert_eq!(harness.relay.status_calls("b"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inflight_failure_is_rejected() {
        let harness = TestHarness::new();
        harness.relay.script_statuses(vec![ScriptedBundle::Unknown]);
        harness.relay.script_inflight(vec![None, Some(InflightStatus::Failed)]);

        let outcome = poller(&harness).poll_bundle("b").await;
        assert!(matches!(outcome, SubmissionOutcome::Rejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let mut harness = TestHarness::new();
        harness.config.poll.max_attempts = 4;
        harness
            .relay
            .script_statuses(vec![status(ConfirmationLevel::Processed, None)]);

        let started = tokio::time::Instant::now();
        let outcome = poller(&harness).poll_bundle("b").await;

        assert_eq!(outcome, SubmissionOutcome::TimedOut);
        assert_eq!(harness.relay.status_calls("b"), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(3 * 2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_throttling_keeps_the_poll_window() {
        let fetch = FetchConfig {
            rpc: LimiterConfig::new(5, Duration::ZERO),
            api: LimiterConfig::new(3, Duration::ZERO),
            ..FetchConfig::default()
        };
        let mut harness = TestHarness::new().with_fetch_config(fetch);
        harness.config.poll = PollConfig::default();
        harness.relay.throttle_statuses();

        let started = tokio::time::Instant::now();
        let outcome = poller(&harness).poll_bundle("b").await;

        let poll = &harness.config.poll;
        assert_eq!(outcome, SubmissionOutcome::TimedOut);
        assert!(started.elapsed() <= poll.interval() * poll.max_attempts);
        assert_eq!(harness.relay.status_calls("b") as u32, poll.max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signature_polling() {
        let harness = TestHarness::new();
        harness.chain.script_signature_statuses(vec![
            None,
            Some(SignatureState {
                confirmation: Some(ConfirmationLevel::Finalized),
                err: None,
            }),
        ]);

        let outcome = poller(&harness)
            .poll(&UnitId::Signature(Signature::new_unique()))
            .await;
        assert_eq!(outcome, SubmissionOutcome::Finalized);
    }
}
