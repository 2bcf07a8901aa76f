#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Trade Heatmap Stream - Live Trade Ingestion Core
//!
//! Keeps a single Socket.IO connection to a realtime trade gateway,
//! normalizes incoming trade events, and maintains the latest trade and a
//! rolling volume aggregate per symbol for a live heatmap.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure data and algorithms
//!   - `trade`: Trade events and payload normalization
//!   - `latest`: Latest-value store with copy-on-write snapshots
//!   - `aggregation`: Rolling window volume aggregator
//!   - `sizing`: Volume to display size mapping
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, clock, broadcast and status interfaces
//!   - `services`: Batch ingestion pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: Socket.IO client with reconnect and status
//!   - `broadcast`: Trade and snapshot fan-out
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics and snapshot HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Gateway WS --> ConnectionManager --mpsc--> PipelineRunner --+--> broadcast (trades)
//!                  (reconnect, ping)          normalize        +--> watch (latest)
//!                                             store/aggregate  +--> watch (volumes)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Trade types and algorithms with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{AggregateSnapshot, RollingAggregator, WindowedAggregate};
pub use domain::latest::{LatestTradeSnapshot, LatestTradeStore};
pub use domain::sizing::Sizer;
pub use domain::trade::{RejectReason, Symbol, TradeEvent, normalize};

// Application
pub use application::ports::{Clock, RawTradeFrame, SystemClock};
pub use application::services::{PipelineConfig, PipelineRunner, TradePipeline};

// Infrastructure config
pub use infrastructure::config::{
    AggregationSettings, AppEnvironment, BroadcastSettings, ConfigError, FeedConfig,
    GatewaySettings, ServerSettings,
};

// Gateway
pub use infrastructure::gateway::{
    ConnectionManager, ConnectionState, ConnectionStatus, FeedStatus, GatewayConfig,
    WebSocketTransport,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
