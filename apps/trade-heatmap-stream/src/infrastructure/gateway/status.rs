//! Feed Status
//!
//! Connection and ingestion progress shared between the connection loop,
//! the ingestion pipeline and the health server. Writers never block each
//! other: counters are atomics and the few structured fields sit behind
//! short `parking_lot` locks.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::application::ports::{BatchSummary, StatusPort};
use crate::domain::trade::RejectReason;
use crate::infrastructure::metrics;

/// Gateway connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Namespace connected; trade events flowing.
    Connected,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Stopped explicitly. Terminal.
    Stopped,
}

impl ConnectionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        }
    }
}

/// Point-in-time view of a [`FeedStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Shorthand for `state == Connected`.
    pub connected: bool,
    /// Last time the namespace connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Processing time of the last batch that accepted a trade, epoch ms.
    pub last_trade_at_ms: Option<i64>,
    /// Event frames received from the gateway.
    pub frames_received: u64,
    /// Trades accepted by the validator.
    pub trades_accepted: u64,
    /// Payloads rejected by the validator.
    pub trades_rejected: u64,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Last connection error, cleared on connect.
    pub last_error: Option<String>,
}

/// Shared, lock-light feed status.
#[derive(Debug)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    connected: AtomicBool,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    last_trade_at_ms: AtomicI64,
    frames_received: AtomicU64,
    trades_accepted: AtomicU64,
    trades_rejected: AtomicU64,
    reconnect_attempts: AtomicU32,
}

/// Sentinel for "no trade processed yet".
const NO_TRADE: i64 = i64::MIN;

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            connected: AtomicBool::new(false),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            last_trade_at_ms: AtomicI64::new(NO_TRADE),
            frames_received: AtomicU64::new(0),
            trades_accepted: AtomicU64::new(0),
            trades_rejected: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Set the connection state.
    ///
    /// `Stopped` is terminal: later transitions are ignored.
    pub fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.state.write();
            if *current == ConnectionState::Stopped {
                return;
            }
            *current = state;
        }

        let connected = state == ConnectionState::Connected;
        self.connected.store(connected, Ordering::Relaxed);
        metrics::set_gateway_connected(connected);

        if connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
    }

    /// Record a connection error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Count one reconnect attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
    }

    /// Count one event frame handed to the pipeline.
    pub fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frames_received(1);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the gateway is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Processing time of the last batch that accepted a trade.
    #[must_use]
    pub fn last_trade_at_ms(&self) -> Option<i64> {
        let value = self.last_trade_at_ms.load(Ordering::Relaxed);
        (value != NO_TRADE).then_some(value)
    }

    /// Frames received so far.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Snapshot every field.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        let state = self.state();
        ConnectionStatus {
            state,
            connected: state == ConnectionState::Connected,
            last_connected_at: *self.last_connected_at.read(),
            last_trade_at_ms: self.last_trade_at_ms(),
            frames_received: self.frames_received(),
            trades_accepted: self.trades_accepted.load(Ordering::Relaxed),
            trades_rejected: self.trades_rejected.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts(),
            last_error: self.last_error.read().clone(),
        }
    }
}

impl StatusPort for FeedStatus {
    fn record_batch(&self, summary: &BatchSummary, processed_at_ms: i64) {
        if summary.accepted > 0 {
            self.trades_accepted
                .fetch_add(summary.accepted as u64, Ordering::Relaxed);
            self.last_trade_at_ms
                .store(processed_at_ms, Ordering::Relaxed);
            metrics::record_trades_accepted(summary.accepted as u64);
        }
        metrics::set_symbol_counts(summary.known_symbols, summary.active_symbols);
        metrics::record_batch_duration(summary.elapsed);
    }

    fn record_rejection(&self, reason: RejectReason) {
        self.trades_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_trade_rejected(reason);
    }
}
