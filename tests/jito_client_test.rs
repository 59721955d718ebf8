//! Jito block-engine client tests against a mock HTTP server

#[cfg(test)]
mod tests {
    use lockin_sweeper::fetch::FetchError;
    use lockin_sweeper::rpc::ConfirmationLevel;
    use lockin_sweeper::services::{InflightStatus, JitoClient, Relay};
    use lockin_sweeper::submit::{interpret_bundle_status, SubmissionOutcome};
    use mockito::Matcher;
    use serde_json::json;
    use solana_sdk::{
        hash::Hash,
        pubkey::Pubkey,
        signature::{Keypair, Signer},
        system_instruction,
        transaction::{Transaction, VersionedTransaction},
    };
    use std::time::Duration;

    fn client(server: &mockito::Server) -> JitoClient {
        JitoClient::new(&format!("{}/api/v1", server.url()), Duration::from_secs(5)).unwrap()
    }

    fn signed_tx() -> VersionedTransaction {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1_000);
        let tx = Transaction::new_signed_with_payer(&[ix], Some(&payer.pubkey()), &[&payer], Hash::new_unique());
        VersionedTransaction::from(tx)
    }

    #[tokio::test]
    async fn test_tip_accounts() {
        let mut server = mockito::Server::new_async().await;
        let tips = [Pubkey::new_unique(), Pubkey::new_unique()];
        server
            .mock("POST", "/api/v1/bundles")
            .match_body(Matcher::PartialJson(json!({ "method": "getTipAccounts" })))
            .with_status(200)
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "result": [tips[0].to_string(), tips[1].to_string()] })
                    .to_string(),
            )
            .create_async()
            .await;

        assert_eq!(client(&server).tip_accounts().await.unwrap(), tips.to_vec());
    }

    #[tokio::test]
    async fn test_send_bundle_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/bundles")
            .match_body(Matcher::PartialJson(json!({ "method": "sendBundle" })))
            .with_status(200)
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "b1d2" }).to_string())
            .create_async()
            .await;

        let id = client(&server).send_bundle(&[signed_tx(), signed_tx()]).await.unwrap();

        mock.assert_async().await;
        assert_eq!(id, "b1d2");
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/bundles")
            .with_status(200)
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32602, "message": "bundle contains an expired blockhash" } })
                    .to_string(),
            )
            .create_async()
            .await;

        let err = client(&server).send_bundle(&[signed_tx()]).await.unwrap_err();
        assert!(matches!(err, FetchError::Rpc(msg) if msg.contains("expired blockhash")));
    }

    #[tokio::test]
    async fn test_bundle_statuses_keep_request_order() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/bundles")
            .match_body(Matcher::PartialJson(json!({ "method": "getBundleStatuses" })))
            .with_status(200)
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "context": { "slot": 242806119 },
                        "value": [{
                            "bundle_id": "landed",
                            "transactions": ["sig"],
                            "slot": 242804011,
                            "confirmation_status": "confirmed",
                            "err": { "Ok": null }
                        }]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let statuses = client(&server)
            .bundle_statuses(&["missing".to_string(), "landed".to_string()])
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].is_none());
        let landed = statuses[1].as_ref().unwrap();
        assert_eq!(landed.confirmation, Some(ConfirmationLevel::Confirmed));
        assert_eq!(landed.slot, Some(242804011));
        assert_eq!(interpret_bundle_status(landed), SubmissionOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_inflight_statuses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/getInflightBundleStatuses")
            .with_status(200)
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "context": { "slot": 280999028 },
                        "value": [
                            { "bundle_id": "a", "status": "Invalid", "landed_slot": null },
                            { "bundle_id": "b", "status": "Landed", "landed_slot": 280999027 }
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let statuses = client(&server)
            .inflight_bundle_statuses(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(
            statuses,
            vec![Some(InflightStatus::Invalid), Some(InflightStatus::Landed), None]
        );
    }
}
