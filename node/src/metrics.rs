//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the
//! configured metrics port. All metrics live in a dedicated registry so
//! they cannot collide with a default global registry consumer.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the metrics registry.
pub type SharedMetrics = Arc<NodeMetrics>;

/// All Prometheus metric handles for the node.
pub struct NodeMetrics {
    registry: Registry,
    /// Height of the local chain tip.
    pub block_height: IntGauge,
    /// Total blocks added to the local chain since startup.
    pub blocks_processed_total: IntCounter,
    /// Current number of pending transactions in the mempool.
    pub transactions_in_mempool: IntGauge,
    /// Currently connected P2P peers.
    pub connected_peers: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("quartz".into()), None)
            .expect("failed to create prometheus registry");

        let block_height = IntGauge::new("block_height", "Height of the local chain tip")
            .expect("metric creation");
        registry
            .register(Box::new(block_height.clone()))
            .expect("metric registration");

        let blocks_processed_total = IntCounter::new(
            "blocks_processed_total",
            "Total blocks added to the local chain since startup",
        )
        .expect("metric creation");
        registry
            .register(Box::new(blocks_processed_total.clone()))
            .expect("metric registration");

        let transactions_in_mempool = IntGauge::new(
            "transactions_in_mempool",
            "Current number of pending transactions in the mempool",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_in_mempool.clone()))
            .expect("metric registration");

        let connected_peers =
            IntGauge::new("connected_peers", "Currently connected P2P peers")
                .expect("metric creation");
        registry
            .register(Box::new(connected_peers.clone()))
            .expect("metric registration");

        Self {
            registry,
            block_height,
            blocks_processed_total,
            transactions_in_mempool,
            connected_peers,
        }
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buf)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics` handler.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    (StatusCode::OK, metrics.encode())
}
