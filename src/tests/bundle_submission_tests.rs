//! Bundle-mode submission tests
//!
//! Signing rejection, wallet readiness, per-bundle relay failures, stale
//! blockhashes and caller cancellation.

#[cfg(test)]
mod bundle_submission_tests {
    use tokio::sync::watch;

    use crate::holdings::{Holding, SelectionSet};
    use crate::pipeline::{HoldingStatus, Summary};
    use crate::submit::SubmissionOutcome;
    use crate::test_utils::TestHarness;

    /// Two holdings whose swaps are too large to share a transaction.
    fn two_transactions(harness: &TestHarness) -> (SelectionSet, Vec<Holding>) {
        let holdings: Vec<Holding> = (0..2)
            .map(|_| {
                let h = harness.routable_holding(5_000);
                harness.aggregator.set_swap_size(h.mint, 600);
                h
            })
            .collect();
        let mut selection = SelectionSet::new(harness.target_mint);
        for h in &holdings {
            selection.insert(h.clone()).unwrap();
        }
        (selection, holdings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_rejection_cancels_without_submitting() {
        let harness = TestHarness::new();
        let (selection, _) = two_transactions(&harness);
        harness.wallet.reject_signing();

        let report = harness.pipeline().lock_in(&selection).await.unwrap();

        assert_eq!(report.summary, Summary::Cancelled);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == HoldingStatus::Cancelled));
        assert!(harness.relay.bundles().is_empty());
        assert!(report.closed_accounts.is_empty());
        assert_eq!(harness.wallet.sign_calls(), 1);
        assert_eq!(harness.metrics.actions_cancelled.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_wallet_is_not_ready() {
        let harness = TestHarness::new();
        let (selection, _) = two_transactions(&harness);
        harness.wallet.disconnect();

        let report = harness.pipeline().lock_in(&selection).await.unwrap();

        assert_eq!(report.summary, Summary::TotalFailure);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o.status, HoldingStatus::NotReady(_))));
        assert_eq!(harness.aggregator.quote_calls(), 0);
        assert_eq!(harness.wallet.sign_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_without_batch_signing_is_not_ready() {
        let harness = TestHarness::new();
        let (selection, _) = two_transactions(&harness);
        harness.wallet.disable_batch_signing();

        let report = harness.pipeline().lock_in(&selection).await.unwrap();

        assert!(matches!(
            &report.outcomes[0].status,
            HoldingStatus::NotReady(reason) if reason.contains("batch")
        ));
        assert!(harness.relay.bundles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_failure_rejects_only_that_bundle() {
        let mut harness = TestHarness::new();
        harness.config.relay.max_bundle_size = 1;
        let (selection, holdings) = two_transactions(&harness);
        harness.relay.fail_bundle_at(1);

        let report = harness.pipeline().lock_in(&selection).await.unwrap();

        assert_eq!(report.transactions, 2);
        assert_eq!(report.units, 2);
        assert_eq!(harness.relay.bundles().len(), 2);
        assert_eq!(
            report.outcomes[0].status,
            HoldingStatus::Outcome(SubmissionOutcome::Finalized)
        );
        assert!(matches!(
            report.outcomes[1].status,
            HoldingStatus::Outcome(SubmissionOutcome::Rejected(_))
        ));
        assert_eq!(
            report.summary,
            Summary::Partial {
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(
            report.closed_accounts.iter().copied().collect::<Vec<_>>(),
            vec![holdings[0].token_account]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundles_are_spaced_and_stale_ones_refused() {
        let mut harness = TestHarness::new();
        harness.config.relay.max_bundle_size = 1;
        harness.config.relay.inter_bundle_delay_ms = 2_000;
        harness.config.relay.max_anchor_age_secs = 1;
        let (selection, _) = two_transactions(&harness);

        let report = harness.pipeline().lock_in(&selection).await.unwrap();

        assert_eq!(harness.relay.bundles().len(), 1);
        assert_eq!(
            report.outcomes[0].status,
            HoldingStatus::Outcome(SubmissionOutcome::Finalized)
        );
        assert_eq!(
            report.outcomes[1].status,
            HoldingStatus::Outcome(SubmissionOutcome::Rejected("stale blockhash".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_new_units() {
        let harness = TestHarness::new();
        let (selection, _) = two_transactions(&harness);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let report = harness
            .pipeline()
            .with_cancellation(cancel_rx)
            .lock_in(&selection)
            .await
            .unwrap();

        assert_eq!(report.summary, Summary::Cancelled);
        assert!(harness.relay.bundles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_bundled_transaction_carries_one_tip() {
        let harness = TestHarness::new();
        let (selection, _) = two_transactions(&harness);

        let report = harness.pipeline().lock_in(&selection).await.unwrap();

        assert_eq!(report.summary, Summary::FullSuccess);
        let bundles = harness.relay.bundles();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].len(), 2);
        let tips = harness.relay.tip_account_keys();
        for tx in &bundles[0] {
            let tip_keys = tx
                .message
                .static_account_keys()
                .iter()
                .filter(|k| tips.contains(k))
                .count();
            assert_eq!(tip_keys, 1);
        }
    }
}
