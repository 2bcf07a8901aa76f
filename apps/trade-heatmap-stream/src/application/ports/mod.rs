//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport` / `Session`: a duplex text-frame connection to the gateway
//! - `Clock`: wall-clock time in epoch milliseconds
//! - `BroadcastPort`: fan-out of trades and snapshots to consumers
//! - `StatusPort`: pipeline progress for health and metrics
//!
//! ## Dispatch
//!
//! - `RawTradeFrame`: the single item type handed from the connection
//!   manager to the ingestion pipeline

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::aggregation::AggregateSnapshot;
use crate::domain::latest::LatestTradeSnapshot;
use crate::domain::trade::{RejectReason, TradeEvent};

// =============================================================================
// Transport
// =============================================================================

/// Transport-level failures. These are retried, never surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Connection attempt did not complete in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Reading from the connection failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Writing to the connection failed.
    #[error("send failed: {0}")]
    Send(String),
}

/// Opens sessions to the gateway.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Session>, TransportError>;
}

/// One live duplex connection exchanging text frames.
#[async_trait]
pub trait Session: Send {
    /// Next text frame. `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// =============================================================================
// Pipeline Outputs
// =============================================================================

/// Fan-out of normalized trades and snapshots to consumers.
pub trait BroadcastPort: Send + Sync {
    /// Publish the trades accepted in one batch, in arrival order.
    fn publish_trades(&self, trades: &[TradeEvent]);

    /// Publish the snapshots produced by a batch or a refresh.
    fn publish_snapshots(&self, latest: &LatestTradeSnapshot, aggregates: &AggregateSnapshot);
}

/// Counters describing one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Frames drained from the dispatch channel.
    pub frames: usize,
    /// Frames that normalized into trades.
    pub accepted: usize,
    /// Frames rejected by the validator.
    pub rejected: usize,
    /// Symbols with a live aggregate after the batch.
    pub active_symbols: usize,
    /// Symbols in the latest-trade snapshot after the batch.
    pub known_symbols: usize,
    /// Time spent validating, aggregating and publishing.
    pub elapsed: Duration,
}

/// Receives pipeline progress for status reporting.
pub trait StatusPort: Send + Sync {
    /// A batch was processed at `processed_at_ms`.
    fn record_batch(&self, summary: &BatchSummary, processed_at_ms: i64);

    /// A payload was rejected.
    fn record_rejection(&self, reason: RejectReason);
}

// =============================================================================
// Dispatch
// =============================================================================

/// A raw trade payload as delivered by the gateway, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTradeFrame {
    /// The event payload exactly as received.
    pub payload: Value,
    /// Receive time in epoch milliseconds.
    pub received_at_ms: i64,
}

impl RawTradeFrame {
    /// Create a frame.
    #[must_use]
    pub const fn new(payload: Value, received_at_ms: i64) -> Self {
        Self {
            payload,
            received_at_ms,
        }
    }
}
