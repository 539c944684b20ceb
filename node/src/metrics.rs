//! # Prometheus Metrics
//!
//! Exposes operational metrics for the shop node. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `tanglecart` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use tanglecart::transaction::Rejection;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct ShopMetrics {
    registry: Registry,
    /// Purchases opened (a deposit address was handed out).
    pub purchases_started_total: IntCounter,
    /// Purchases completed and queued for granting.
    pub purchases_completed_total: IntCounter,
    /// Confirmations rejected by verification, labelled by `reason`.
    pub verification_rejections_total: IntCounterVec,
    /// Open purchases cancelled by their buyer.
    pub cancellations_total: IntCounter,
    /// Requests refused because the player was still cooling down.
    pub cooldown_hits_total: IntCounter,
    /// Wall time of a confirmation, ledger round trip included.
    pub verification_latency_seconds: Histogram,
}

impl ShopMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("tanglecart".into()), None)?;

        let purchases_started_total = IntCounter::new(
            "purchases_started_total",
            "Total number of purchases opened",
        )?;
        registry.register(Box::new(purchases_started_total.clone()))?;

        let purchases_completed_total = IntCounter::new(
            "purchases_completed_total",
            "Total number of purchases verified and completed",
        )?;
        registry.register(Box::new(purchases_completed_total.clone()))?;

        let verification_rejections_total = IntCounterVec::new(
            Opts::new(
                "verification_rejections_total",
                "Total number of confirmations rejected by payment verification",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(verification_rejections_total.clone()))?;

        let cancellations_total = IntCounter::new(
            "cancellations_total",
            "Total number of open purchases cancelled",
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let cooldown_hits_total = IntCounter::new(
            "cooldown_hits_total",
            "Total number of requests refused by the per-player cooldown",
        )?;
        registry.register(Box::new(cooldown_hits_total.clone()))?;

        let verification_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "verification_latency_seconds",
                "Purchase confirmation latency in seconds, ledger lookup included",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(verification_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            purchases_started_total,
            purchases_completed_total,
            verification_rejections_total,
            cancellations_total,
            cooldown_hits_total,
            verification_latency_seconds,
        })
    }

    /// Counts one rejected confirmation.
    pub fn record_rejection(&self, rejection: Rejection) {
        let reason = match rejection {
            Rejection::InvalidHash => "invalid_hash",
            Rejection::NoMatchingTransfer => "no_matching_transfer",
            Rejection::HashAlreadyUsed => "hash_already_used",
        };
        self.verification_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<ShopMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
