//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: raw frames received from the gateway
//! - **Trades**: accepted trades, rejections by reason, broadcast deliveries
//! - **Connection**: gateway connection gauge and reconnect attempts
//! - **Symbols**: tracked and windowed symbol counts
//! - **Latency**: batch processing time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::trade::RejectReason;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "trade_heatmap_frames_received_total",
        "Total trade event frames received from the gateway"
    );
    describe_counter!(
        "trade_heatmap_trades_accepted_total",
        "Total trade events accepted by the validator"
    );
    describe_counter!(
        "trade_heatmap_trades_rejected_total",
        "Total trade events rejected by the validator, by reason"
    );
    describe_counter!(
        "trade_heatmap_trades_published_total",
        "Total trades published to the broadcast hub"
    );

    describe_gauge!(
        "trade_heatmap_gateway_connected",
        "Whether the gateway connection is established (1) or not (0)"
    );
    describe_counter!(
        "trade_heatmap_reconnects_total",
        "Total gateway reconnection attempts"
    );
    describe_counter!(
        "trade_heatmap_gateway_errors_total",
        "Total gateway connection errors by type"
    );

    describe_gauge!(
        "trade_heatmap_known_symbols",
        "Symbols with a latest trade"
    );
    describe_gauge!(
        "trade_heatmap_active_symbols",
        "Symbols with at least one trade inside the window"
    );

    describe_histogram!(
        "trade_heatmap_batch_processing_seconds",
        "Time to validate, aggregate and publish one batch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record frames received from the gateway.
pub fn record_frames_received(count: u64) {
    counter!("trade_heatmap_frames_received_total").increment(count);
}

/// Record trades accepted by the validator.
pub fn record_trades_accepted(count: u64) {
    counter!("trade_heatmap_trades_accepted_total").increment(count);
}

/// Record one rejected payload.
pub fn record_trade_rejected(reason: RejectReason) {
    counter!(
        "trade_heatmap_trades_rejected_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record trades handed to the broadcast hub.
pub fn record_trades_published(count: u64) {
    counter!("trade_heatmap_trades_published_total").increment(count);
}

/// Update the gateway connection gauge.
pub fn set_gateway_connected(connected: bool) {
    gauge!("trade_heatmap_gateway_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("trade_heatmap_reconnects_total").increment(1);
}

/// Record a gateway error.
pub fn record_gateway_error(error_type: &'static str) {
    counter!(
        "trade_heatmap_gateway_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Update the symbol gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_symbol_counts(known: usize, active: usize) {
    gauge!("trade_heatmap_known_symbols").set(known as f64);
    gauge!("trade_heatmap_active_symbols").set(active as f64);
}

/// Record batch processing duration.
pub fn record_batch_duration(duration: Duration) {
    histogram!("trade_heatmap_batch_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_frames_received(3);
        record_trade_rejected(RejectReason::InvalidPrice);
        set_gateway_connected(true);
        set_symbol_counts(2, 1);
        record_batch_duration(Duration::from_millis(1));
    }

    #[test]
    fn handle_renders_registered_metrics() {
        let handle = init_metrics();
        record_trades_accepted(1);
        record_trade_rejected(RejectReason::InvalidSymbol);

        let rendered = handle.render();
        assert!(rendered.contains("trade_heatmap_trades_accepted_total"));
        assert!(rendered.contains("reason=\"invalid_symbol\""));
        assert!(get_metrics_handle().is_some());
    }
}
