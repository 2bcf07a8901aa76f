//! Health Check, Metrics and Snapshot Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, Prometheus
//! metrics and read-only views of the current snapshots.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready when the gateway is connected)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /snapshot/trades` - Latest trade per symbol
//! - `GET /snapshot/volumes` - Windowed volume per symbol with its display size

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::aggregation::AggregateSnapshot;
use crate::domain::sizing::Sizer;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::gateway::{ConnectionState, ConnectionStatus, FeedStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Gateway connection status.
    pub feed: ConnectionStatus,
    /// Snapshot statistics.
    pub snapshots: SnapshotStatus,
    /// Broadcast receivers across all channels.
    pub broadcast_receivers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and ingesting.
    Healthy,
    /// Connecting or backing off.
    Degraded,
    /// Disconnected or stopped.
    Unhealthy,
}

/// Snapshot statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    /// Symbols with a latest trade.
    pub known_symbols: usize,
    /// Symbols with trades inside the window.
    pub active_symbols: usize,
    /// Sum of windowed volume over all symbols.
    pub total_volume: f64,
    /// Aggregation window in milliseconds.
    pub window_ms: i64,
}

/// Windowed volume of one symbol, as served by `/snapshot/volumes`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeView {
    /// Sum of sizes inside the window.
    pub volume: f64,
    /// Trades inside the window.
    pub trade_count: usize,
    /// Latest trade timestamp inside the window, epoch ms.
    pub last_update: i64,
    /// Display size derived from the volume.
    pub size: f64,
}

/// Body of `/snapshot/volumes`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    /// Aggregation window in milliseconds.
    pub window_ms: i64,
    /// Per-symbol volume, sorted by symbol.
    pub symbols: BTreeMap<String, VolumeView>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_status: Arc<FeedStatus>,
    broadcast_hub: SharedBroadcastHub,
    sizer: Sizer,
    window_ms: i64,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed_status: Arc<FeedStatus>,
        broadcast_hub: SharedBroadcastHub,
        sizer: Sizer,
        window_ms: i64,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_status,
            broadcast_hub,
            sizer,
            window_ms,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the HTTP routes.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/snapshot/trades", get(trades_handler))
        .route("/snapshot/volumes", get(volumes_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed_status.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn trades_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.broadcast_hub.latest_snapshot())
}

async fn volumes_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let aggregates = state.broadcast_hub.aggregate_snapshot();
    Json(build_volumes_response(&aggregates, &state.sizer, state.window_ms))
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.feed_status.snapshot();
    let aggregates = state.broadcast_hub.aggregate_snapshot();

    HealthResponse {
        status: determine_health_status(feed.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        snapshots: SnapshotStatus {
            known_symbols: state.broadcast_hub.latest_snapshot().len(),
            active_symbols: aggregates.len(),
            total_volume: aggregates.total_volume(),
            window_ms: state.window_ms,
        },
        broadcast_receivers: state.broadcast_hub.stats().total_receivers(),
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Stopped => HealthStatus::Unhealthy,
    }
}

fn build_volumes_response(
    aggregates: &AggregateSnapshot,
    sizer: &Sizer,
    window_ms: i64,
) -> VolumesResponse {
    let symbols = aggregates
        .iter()
        .map(|(symbol, aggregate)| {
            (
                symbol.clone(),
                VolumeView {
                    volume: aggregate.volume,
                    trade_count: aggregate.trade_count,
                    last_update: aggregate.last_update,
                    size: sizer.size_of(Some(aggregate)),
                },
            )
        })
        .collect();

    VolumesResponse { window_ms, symbols }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::BroadcastPort;
    use crate::domain::aggregation::RollingAggregator;
    use crate::domain::latest::LatestTradeStore;
    use crate::domain::trade::TradeEvent;
    use crate::infrastructure::broadcast::BroadcastHub;

    const T0: i64 = 1_700_000_000_000;

    fn populated_hub() -> SharedBroadcastHub {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let trades = [
            TradeEvent::new("AAPL", 101.0, 50.0, T0),
            TradeEvent::new("AAPL", 102.0, 70.0, T0 + 1),
            TradeEvent::new("MSFT", 300.0, 400.0, T0 + 2),
        ];

        let mut store = LatestTradeStore::new();
        let mut aggregator = RollingAggregator::with_default_window();
        store.update_all(trades.iter().cloned());
        let aggregates = aggregator.ingest(trades.iter().cloned(), T0 + 10);
        hub.publish_snapshots(&store.snapshot(), &aggregates);
        hub
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_connection_state() {
        assert_eq!(
            determine_health_status(ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(ConnectionState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ConnectionState::Stopped),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn health_response_reports_snapshots() {
        let feed_status = Arc::new(FeedStatus::new());
        feed_status.set_state(ConnectionState::Connected);
        let state = HealthServerState::new(
            "0.1.0".to_string(),
            feed_status,
            populated_hub(),
            Sizer::default(),
            60_000,
        );

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(response.feed.connected);
        assert_eq!(response.snapshots.known_symbols, 2);
        assert_eq!(response.snapshots.active_symbols, 2);
        assert!((response.snapshots.total_volume - 520.0).abs() < 1e-9);
    }

    #[test]
    fn volumes_carry_display_size() {
        let hub = populated_hub();
        let response =
            build_volumes_response(&hub.aggregate_snapshot(), &Sizer::default(), 60_000);

        let msft = response.symbols["MSFT"];
        assert!((msft.volume - 400.0).abs() < f64::EPSILON);
        assert!((msft.size - 2.0).abs() < 1e-9);
        assert_eq!(response.symbols["AAPL"].trade_count, 2);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["windowMs"], 60_000);
        assert_eq!(json["symbols"]["AAPL"]["tradeCount"], 2);
    }
}
