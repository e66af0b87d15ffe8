//! Prometheus metrics.
//!
//! # Exported metrics
//! - `notifications_config_reloads_total` (counter): settings snapshots applied.
//! - `notifications_controller_generation` (gauge): generation of the active controller.
//! - `notifications_webhook_requests_total` (counter): inbound webhooks by channel and outcome.
//! - `notifications_commands_processed_total` (counter): intake commands handled by channel.
//! - `notifications_deliveries_total` (counter): outbound deliveries by channel and outcome.
//! - `notifications_start_time_seconds` (gauge): process start time in Unix seconds.
//!
//! The registry is created once per process and served from `/metrics`; it
//! survives controller reloads. Only these series are exported; there are no
//! runtime or OS-level process collectors.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::error;

/// Labels for inbound webhook requests
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WebhookLabels {
    pub channel: String,
    /// `accepted`, or the verification failure kind
    pub outcome: String,
}

/// Labels for processed intake commands
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChannelLabels {
    pub channel: String,
}

/// Labels for outbound deliveries
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeliveryLabels {
    pub channel: String,
    /// `sent` or `failed`
    pub outcome: String,
}

/// Process-lifetime metrics handle. Cloning shares the underlying series.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    config_reloads: Counter,
    controller_generation: Gauge,
    webhook_requests: Family<WebhookLabels, Counter>,
    commands_processed: Family<ChannelLabels, Counter>,
    deliveries: Family<DeliveryLabels, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("notifications");

        let config_reloads = Counter::default();
        registry.register(
            "config_reloads",
            "Settings snapshots applied by the supervisor",
            config_reloads.clone(),
        );

        let controller_generation = Gauge::default();
        registry.register(
            "controller_generation",
            "Generation number of the active controller",
            controller_generation.clone(),
        );

        let webhook_requests = Family::<WebhookLabels, Counter>::default();
        registry.register(
            "webhook_requests",
            "Inbound webhook requests by channel and outcome",
            webhook_requests.clone(),
        );

        let commands_processed = Family::<ChannelLabels, Counter>::default();
        registry.register(
            "commands_processed",
            "Inbound commands handled by the controller",
            commands_processed.clone(),
        );

        let deliveries = Family::<DeliveryLabels, Counter>::default();
        registry.register(
            "deliveries",
            "Notifications delivered to subscription destinations",
            deliveries.clone(),
        );

        let start_time = Gauge::<i64>::default();
        start_time.set(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
                .unwrap_or_default(),
        );
        registry.register(
            "start_time_seconds",
            "Start time of the process since unix epoch in seconds",
            start_time,
        );

        Self {
            registry: Arc::new(registry),
            config_reloads,
            controller_generation,
            webhook_requests,
            commands_processed,
            deliveries,
        }
    }

    pub fn record_reload(&self, generation: u64) {
        self.config_reloads.inc();
        self.controller_generation
            .set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    pub fn record_webhook(&self, channel: &str, outcome: &str) {
        self.webhook_requests
            .get_or_create(&WebhookLabels {
                channel: channel.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_command(&self, channel: &str) {
        self.commands_processed
            .get_or_create(&ChannelLabels {
                channel: channel.to_string(),
            })
            .inc();
    }

    pub fn record_delivery(&self, channel: &str, outcome: &str) {
        self.deliveries
            .get_or_create(&DeliveryLabels {
                channel: channel.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics endpoint handler
async fn metrics_handler(State(metrics): State<Metrics>) -> (StatusCode, String) {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "metrics_encode_failed");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Router serving `/metrics`.
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_series() {
        let metrics = Metrics::new();
        metrics.record_reload(3);
        metrics.record_webhook("slack", "accepted");
        metrics.record_webhook("slack", "signature_mismatch");
        metrics.record_command("slack");
        metrics.record_delivery("alerts", "failed");

        let text = metrics.encode().unwrap();
        assert!(text.contains("notifications_config_reloads_total 1"));
        assert!(text.contains("notifications_controller_generation 3"));
        assert!(text.contains("outcome=\"signature_mismatch\""));
        assert!(text.contains("notifications_commands_processed_total{channel=\"slack\"} 1"));
        assert!(text.contains(
            "notifications_deliveries_total{channel=\"alerts\",outcome=\"failed\"} 1"
        ));
    }

    #[test]
    fn test_start_time_is_exported() {
        let text = Metrics::new().encode().unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("notifications_start_time_seconds "))
            .unwrap();
        let value: i64 = line.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(value > 1_600_000_000);
    }

    #[test]
    fn test_clones_share_series() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_reload(1);
        clone.record_reload(2);
        assert!(metrics.encode().unwrap().contains("notifications_config_reloads_total 2"));
    }
}
