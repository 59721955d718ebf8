//! Jupiter client tests against a mock HTTP server

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD as BASE64_ENGINE, Engine};
    use lockin_sweeper::fetch::{FetchError, PARTIAL_ROUTE_MARKER};
    use lockin_sweeper::services::{
        Aggregator, JupiterClient, PriceSource, Quote, QuoteRequest, Slippage, SwapOptions, SwapPayload,
        SwapPayloadMode,
    };
    use mockito::Matcher;
    use serde_json::json;
    use solana_sdk::pubkey::Pubkey;
    use std::time::Duration;

    fn client(server: &mockito::Server) -> JupiterClient {
        JupiterClient::new(
            &format!("{}/v6", server.url()),
            &format!("{}/price", server.url()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request(input: Pubkey, output: Pubkey) -> QuoteRequest {
        QuoteRequest {
            input_mint: input,
            output_mint: output,
            amount: 1_000_000,
            slippage: Slippage::Fixed { bps: 50 },
        }
    }

    fn raw_ix(program: &Pubkey, account: &Pubkey, data: &[u8]) -> serde_json::Value {
        json!({
            "programId": program.to_string(),
            "accounts": [{ "pubkey": account.to_string(), "isSigner": false, "isWritable": true }],
            "data": BASE64_ENGINE.encode(data),
        })
    }

    #[tokio::test]
    async fn test_quote_sends_params_and_parses_route() {
        let mut server = mockito::Server::new_async().await;
        let input = Pubkey::new_unique();
        let output = Pubkey::new_unique();
        let mock = server
            .mock("GET", "/v6/quote")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("inputMint".into(), input.to_string()),
                Matcher::UrlEncoded("outputMint".into(), output.to_string()),
                Matcher::UrlEncoded("amount".into(), "1000000".into()),
                Matcher::UrlEncoded("slippageBps".into(), "50".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "inputMint": input.to_string(),
                    "inAmount": "1000000",
                    "outAmount": "31337",
                    "routePlan": [{ "percent": 60 }, { "percent": 40 }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let quote = client(&server).quote(&request(input, output)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.in_amount, 1_000_000);
        assert_eq!(quote.out_amount, 31_337);
        assert_eq!(quote.route_hops, 2);
        assert!(quote.has_route());
    }

    #[tokio::test]
    async fn test_partial_route_error_is_recognised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v6/quote")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(json!({ "error": "Route not found", "errorCode": PARTIAL_ROUTE_MARKER }).to_string())
            .create_async()
            .await;

        let err = client(&server)
            .quote(&request(Pubkey::new_unique(), Pubkey::new_unique()))
            .await
            .unwrap_err();

        assert!(err.is_partial_route());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v6/quote")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("Too Many Requests")
            .create_async()
            .await;

        let err = client(&server)
            .quote(&request(Pubkey::new_unique(), Pubkey::new_unique()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RateLimited { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_swap_instructions_decoded_in_order() {
        let mut server = mockito::Server::new_async().await;
        let program = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let table = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let fee = Pubkey::new_unique();
        let mock = server
            .mock("POST", "/v6/swap-instructions")
            .match_body(Matcher::PartialJson(json!({
                "userPublicKey": user.to_string(),
                "feeAccount": fee.to_string(),
                "wrapAndUnwrapSol": true,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "computeBudgetInstructions": [raw_ix(&program, &account, &[0])],
                    "setupInstructions": [raw_ix(&program, &account, &[1])],
                    "swapInstruction": raw_ix(&program, &account, &[2]),
                    "cleanupInstruction": raw_ix(&program, &account, &[3]),
                    "addressLookupTableAddresses": [table.to_string()]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let quote = Quote::from_json(json!({ "inAmount": "1", "outAmount": "1", "routePlan": [{}] })).unwrap();
        let options = SwapOptions {
            user,
            fee_account: Some(fee),
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
        };
        let payload = client(&server)
            .swap_payload(&quote, &options, SwapPayloadMode::Instructions)
            .await
            .unwrap();

        mock.assert_async().await;
        let SwapPayload::Instructions(set) = payload else {
            panic!("expected instructions");
        };
        assert_eq!(set.compute_budget.len(), 1);
        let data: Vec<u8> = set.ordered().iter().map(|ix| ix.data[0]).collect();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(set.lookup_table_addresses, vec![table]);
    }

    #[tokio::test]
    async fn test_spot_price() {
        let mut server = mockito::Server::new_async().await;
        let mint = Pubkey::new_unique();
        let unknown = Pubkey::new_unique();
        server
            .mock("GET", "/price")
            .match_query(Matcher::UrlEncoded("ids".into(), mint.to_string()))
            .with_status(200)
            .with_body(json!({ "data": { mint.to_string(): { "price": "1.25" } } }).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/price")
            .match_query(Matcher::UrlEncoded("ids".into(), unknown.to_string()))
            .with_status(200)
            .with_body(json!({ "data": { unknown.to_string(): null } }).to_string())
            .create_async()
            .await;

        let jupiter = client(&server);
        assert_eq!(jupiter.spot_usd(&mint).await.unwrap(), Some(1.25));
        assert_eq!(jupiter.spot_usd(&unknown).await.unwrap(), None);
    }
}
