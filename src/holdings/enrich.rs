//! Holdings enrichment: enumerate the wallet's token accounts, then price,
//! name, classify and probe each one concurrently.

use futures::stream::{self, StreamExt};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, info};

use super::{dedupe_entries, Holding, HoldingKind};
use crate::fetch::{FetchError, FetchLayer};
use crate::metrics::{Metrics, Timer};
use crate::rpc::TokenAccountEntry;
use crate::services::metadata::{
    metadata_address, resolve_metadata, MetadataSource, OnChainMetadata, TokenRegistry,
    DEFAULT_IMAGE_URL,
};
use crate::services::{QuoteRequest, Services, Slippage};
use crate::structured_logging::StructuredLogger;

/// Enriched holdings in enumeration order plus the accounts that could not
/// be enriched.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    pub holdings: Vec<Holding>,
    /// (token account, reason)
    pub dropped: Vec<(Pubkey, String)>,
}

pub struct Enricher {
    services: Services,
    fetch: Arc<FetchLayer>,
    registry: Arc<TokenRegistry>,
    metrics: Arc<Metrics>,
    target_mint: Pubkey,
    probe_slippage_bps: u16,
    concurrency: usize,
}

impl Enricher {
    pub fn new(
        services: Services,
        fetch: Arc<FetchLayer>,
        registry: Arc<TokenRegistry>,
        metrics: Arc<Metrics>,
        target_mint: Pubkey,
        probe_slippage_bps: u16,
        concurrency: usize,
    ) -> Self {
        Self {
            services,
            fetch,
            registry,
            metrics,
            target_mint,
            probe_slippage_bps,
            concurrency: concurrency.max(1),
        }
    }

    /// Token accounts of `owner`, duplicates collapsed. Any failure here is
    /// fatal to the caller.
    pub async fn enumerate(&self, owner: &Pubkey) -> Result<Vec<TokenAccountEntry>, FetchError> {
        let chain = &self.services.chain;
        let entries = self
            .fetch
            .schedule_rpc("token_accounts_by_owner", move || chain.token_accounts_by_owner(owner))
            .await?;
        let enumerated = entries.len();
        let entries = dedupe_entries(entries);
        if entries.len() != enumerated {
            debug!(
                enumerated,
                distinct = entries.len(),
                "Collapsed duplicate token account entries"
            );
        }
        self.metrics.holdings_enumerated.inc_by(entries.len() as u64);
        Ok(entries)
    }

    /// Enumerate and enrich in one call.
    pub async fn run(&self, owner: &Pubkey, logger: &StructuredLogger) -> Result<EnrichmentReport, FetchError> {
        let entries = self.enumerate(owner).await?;
        Ok(self.enrich(entries, logger).await)
    }

    /// Enrich every entry independently. A failure drops only that entry;
    /// results are re-ordered by enumeration position, not completion.
    pub async fn enrich(&self, entries: Vec<TokenAccountEntry>, logger: &StructuredLogger) -> EnrichmentReport {
        logger.log_stage("enrich", entries.len());

        let mut results: Vec<(usize, TokenAccountEntry, Result<Holding, String>)> =
            stream::iter(entries.into_iter().enumerate())
                .map(|(index, entry)| async move {
                    let result = self.enrich_one(&entry).await;
                    (index, entry, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut report = EnrichmentReport::default();
        for (_, entry, result) in results {
            match result {
                Ok(holding) => {
                    logger.log_holding_enriched(
                        &holding.mint,
                        &holding.symbol,
                        holding.usd_value,
                        holding.swappable,
                    );
                    self.metrics.holdings_enriched.inc();
                    report.holdings.push(holding);
                }
                Err(reason) => {
                    logger.log_holding_dropped(&entry.mint, &entry.address, &reason);
                    self.metrics.holdings_dropped.inc();
                    report.dropped.push((entry.address, reason));
                }
            }
        }

        info!(
            enriched = report.holdings.len(),
            dropped = report.dropped.len(),
            "Enrichment complete"
        );
        report
    }

    async fn enrich_one(&self, entry: &TokenAccountEntry) -> Result<Holding, String> {
        let timer = Timer::new();
        let services = &self.services;
        let mint = entry.mint;

        let metadata_account = &metadata_address(&mint);
        let metadata_data = self
            .fetch
            .with_token_retry_rpc("metadata_account", move || {
                services.chain.account_data(metadata_account)
            })
            .await
            .ok_or_else(|| "metadata lookup failed".to_string())?;
        let on_chain = metadata_data.and_then(|data| match OnChainMetadata::decode(&data) {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!(mint = %mint, error = %e, "Undecodable metadata account");
                None
            }
        });
        let resolved = resolve_metadata(&mint, on_chain.as_ref(), &self.registry);

        let kind = if resolved.token_standard.is_some_and(|s| s.is_non_fungible()) {
            HoldingKind::NonFungible
        } else {
            HoldingKind::Fungible
        };

        let ui_amount = entry.raw_amount as f64 / 10f64.powi(i32::from(entry.decimals));
        let usd_value = match kind {
            HoldingKind::Fungible => {
                let mint = &mint;
                let spot = self
                    .fetch
                    .with_token_retry_api("spot_price", move || services.prices.spot_usd(mint))
                    .await
                    .ok_or_else(|| "price lookup failed".to_string())?;
                spot.unwrap_or(0.0) * ui_amount
            }
            HoldingKind::NonFungible => {
                let key = &resolved.collection.unwrap_or(mint);
                let floor = self
                    .fetch
                    .schedule_api("floor_price", move || services.floor.floor_usd(key))
                    .await;
                match floor {
                    Ok(price) => price.unwrap_or(0.0) * ui_amount,
                    Err(e) => {
                        debug!(mint = %mint, error = %e, "Floor price unavailable");
                        0.0
                    }
                }
            }
        };

        let swappable = self.probe_route(entry).await;

        let mut image = resolved.image.clone();
        if image.is_none() {
            if let Some(uri) = resolved.uri.as_deref() {
                image = self
                    .fetch
                    .schedule_api("metadata_json", move || services.content.image_for(uri))
                    .await
                    .unwrap_or_else(|e| {
                        debug!(mint = %mint, error = %e, "Image resolution failed");
                        None
                    });
            }
        }
        if image.is_none() && resolved.source == MetadataSource::Default {
            image = Some(DEFAULT_IMAGE_URL.to_string());
        }

        timer.observe_duration(&self.metrics.enrich_latency);
        Ok(Holding {
            mint,
            token_account: entry.address,
            raw_amount: entry.raw_amount,
            decimals: entry.decimals,
            kind,
            name: resolved.name,
            symbol: resolved.symbol,
            image,
            usd_value,
            swappable,
            metadata_source: resolved.source,
            collection: resolved.collection,
        })
    }

    /// Whether a route to the target exists for the full balance. Probe
    /// failures count as no route.
    async fn probe_route(&self, entry: &TokenAccountEntry) -> bool {
        if entry.mint == self.target_mint {
            return true;
        }
        if entry.raw_amount == 0 {
            return false;
        }
        let request = QuoteRequest {
            input_mint: entry.mint,
            output_mint: self.target_mint,
            amount: entry.raw_amount,
            slippage: Slippage::Fixed {
                bps: self.probe_slippage_bps,
            },
        };
        let aggregator = &self.services.aggregator;
        let request = &request;
        match self
            .fetch
            .schedule_api("route_probe", move || aggregator.quote(request))
            .await
        {
            Ok(quote) => quote.has_route(),
            Err(e) => {
                debug!(mint = %entry.mint, error = %e, "Route probe failed");
                false
            }
        }
    }
}
