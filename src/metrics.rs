//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Instant;

/// Metrics registry owned by one pipeline instance
pub struct Metrics {
    registry: Registry,

    // Fetch layer
    pub fetch_retries: IntCounter,
    pub fetch_failures: IntCounterVec,

    // Enrichment
    pub holdings_enumerated: IntCounter,
    pub holdings_enriched: IntCounter,
    pub holdings_dropped: IntCounter,

    // Instruction building
    pub quotes_requested: IntCounter,
    pub quote_shrinks: IntCounter,
    pub build_failures: IntCounter,

    // Packing and submission
    pub transactions_packed: IntCounter,
    pub oversized_items: IntCounter,
    pub bundles_submitted: IntCounter,
    pub transactions_sent: IntCounter,
    pub outcomes: IntCounterVec,
    pub actions_cancelled: IntCounter,

    // Gauges
    pub units_in_flight: IntGauge,

    // Histograms
    pub fetch_latency: HistogramVec,
    pub enrich_latency: Histogram,
    pub confirm_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let fetch_retries = IntCounter::with_opts(Opts::new(
            "fetch_retries_total",
            "Retried outbound calls after rate-limit or transient errors",
        ))?;

        let fetch_failures = IntCounterVec::new(
            Opts::new(
                "fetch_failures_total",
                "Outbound calls that failed after retries",
            ),
            &["limiter", "category"],
        )?;

        let holdings_enumerated = IntCounter::with_opts(Opts::new(
            "holdings_enumerated_total",
            "Token accounts returned by enumeration",
        ))?;

        let holdings_enriched = IntCounter::with_opts(Opts::new(
            "holdings_enriched_total",
            "Holdings that completed enrichment",
        ))?;

        let holdings_dropped = IntCounter::with_opts(Opts::new(
            "holdings_dropped_total",
            "Holdings dropped after per-token retries were exhausted",
        ))?;

        let quotes_requested =
            IntCounter::with_opts(Opts::new("quotes_requested_total", "Aggregator quote calls"))?;

        let quote_shrinks = IntCounter::with_opts(Opts::new(
            "quote_shrinks_total",
            "Quote retries with a reduced input amount",
        ))?;

        let build_failures = IntCounter::with_opts(Opts::new(
            "build_failures_total",
            "Holdings skipped during instruction building",
        ))?;

        let transactions_packed = IntCounter::with_opts(Opts::new(
            "transactions_packed_total",
            "Transactions produced by the packer",
        ))?;

        let oversized_items = IntCounter::with_opts(Opts::new(
            "oversized_items_total",
            "Pack items that could not fit an empty transaction",
        ))?;

        let bundles_submitted = IntCounter::with_opts(Opts::new(
            "bundles_submitted_total",
            "Bundles accepted by the relay for processing",
        ))?;

        let transactions_sent = IntCounter::with_opts(Opts::new(
            "transactions_sent_total",
            "Transactions sent individually to the network",
        ))?;

        let outcomes = IntCounterVec::new(
            Opts::new("submission_outcomes_total", "Terminal submission outcomes"),
            &["outcome"],
        )?;

        let actions_cancelled = IntCounter::with_opts(Opts::new(
            "actions_cancelled_total",
            "Lock-in actions cancelled at the signing prompt",
        ))?;

        let units_in_flight = IntGauge::with_opts(Opts::new(
            "units_in_flight",
            "Bundles or transactions awaiting a terminal state",
        ))?;

        let fetch_latency = HistogramVec::new(
            HistogramOpts::new("fetch_latency_seconds", "Outbound call latency incl. retries")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["limiter"],
        )?;

        let enrich_latency = Histogram::with_opts(
            HistogramOpts::new("enrich_latency_seconds", "Per-holding enrichment latency")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        let confirm_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirm_latency_seconds",
                "Time from submission to terminal state",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(fetch_retries.clone()))?;
        registry.register(Box::new(fetch_failures.clone()))?;
        registry.register(Box::new(holdings_enumerated.clone()))?;
        registry.register(Box::new(holdings_enriched.clone()))?;
        registry.register(Box::new(holdings_dropped.clone()))?;
        registry.register(Box::new(quotes_requested.clone()))?;
        registry.register(Box::new(quote_shrinks.clone()))?;
        registry.register(Box::new(build_failures.clone()))?;
        registry.register(Box::new(transactions_packed.clone()))?;
        registry.register(Box::new(oversized_items.clone()))?;
        registry.register(Box::new(bundles_submitted.clone()))?;
        registry.register(Box::new(transactions_sent.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(actions_cancelled.clone()))?;
        registry.register(Box::new(units_in_flight.clone()))?;
        registry.register(Box::new(fetch_latency.clone()))?;
        registry.register(Box::new(enrich_latency.clone()))?;
        registry.register(Box::new(confirm_latency.clone()))?;

        Ok(Self {
            registry,
            fetch_retries,
            fetch_failures,
            holdings_enumerated,
            holdings_enriched,
            holdings_dropped,
            quotes_requested,
            quote_shrinks,
            build_failures,
            transactions_packed,
            oversized_items,
            bundles_submitted,
            transactions_sent,
            outcomes,
            actions_cancelled,
            units_in_flight,
            fetch_latency,
            enrich_latency,
            confirm_latency,
        })
    }

    /// Prometheus text exposition of everything registered here.
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.outcomes.with_label_values(&[outcome]).inc();
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
