//! Broadcast Channel Adapters
//!
//! Fan-out of pipeline output to any number of readers.
//!
//! # Architecture
//!
//! The `BroadcastHub` owns three channels:
//! - a `broadcast` channel of every accepted [`TradeEvent`], in order
//! - a `watch` channel holding the latest-trade snapshot
//! - a `watch` channel holding the aggregate snapshot
//!
//! Snapshots are `Arc`-backed, so publishing one is a pointer copy and a
//! slow reader only ever sees a stale, never a half-written, value.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::application::ports::BroadcastPort;
use crate::domain::aggregation::AggregateSnapshot;
use crate::domain::latest::LatestTradeSnapshot;
use crate::domain::trade::TradeEvent;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity for the trade channel. Lagging receivers lose the oldest
    /// trades beyond this.
    pub trades_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            trades_capacity: 10_000,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            trades_capacity: settings.trades_capacity,
        }
    }
}

/// Central hub for trades and snapshots.
///
/// # Example
///
/// ```rust
/// use trade_heatmap_stream::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
///
/// let _trades = hub.trades_rx();
/// let volumes = hub.aggregates_rx();
/// assert!(volumes.borrow().is_empty());
/// assert_eq!(hub.trades_receiver_count(), 1);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    trades_tx: broadcast::Sender<TradeEvent>,
    latest_tx: watch::Sender<LatestTradeSnapshot>,
    aggregates_tx: watch::Sender<AggregateSnapshot>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            trades_tx: broadcast::channel(config.trades_capacity.max(1)).0,
            latest_tx: watch::Sender::new(LatestTradeSnapshot::default()),
            aggregates_tx: watch::Sender::new(AggregateSnapshot::default()),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Trade Channel
    // =========================================================================

    /// Send a trade to all subscribers.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    #[must_use]
    pub fn send_trade(&self, trade: TradeEvent) -> Option<usize> {
        self.trades_tx.send(trade).ok()
    }

    /// Get a new receiver for trades.
    #[must_use]
    pub fn trades_rx(&self) -> broadcast::Receiver<TradeEvent> {
        self.trades_tx.subscribe()
    }

    /// Number of active trade receivers.
    #[must_use]
    pub fn trades_receiver_count(&self) -> usize {
        self.trades_tx.receiver_count()
    }

    // =========================================================================
    // Snapshot Channels
    // =========================================================================

    /// Get a receiver for the latest-trade snapshot.
    #[must_use]
    pub fn latest_rx(&self) -> watch::Receiver<LatestTradeSnapshot> {
        self.latest_tx.subscribe()
    }

    /// Get a receiver for the aggregate snapshot.
    #[must_use]
    pub fn aggregates_rx(&self) -> watch::Receiver<AggregateSnapshot> {
        self.aggregates_tx.subscribe()
    }

    /// Current latest-trade snapshot.
    #[must_use]
    pub fn latest_snapshot(&self) -> LatestTradeSnapshot {
        self.latest_tx.borrow().clone()
    }

    /// Current aggregate snapshot.
    #[must_use]
    pub fn aggregate_snapshot(&self) -> AggregateSnapshot {
        self.aggregates_tx.borrow().clone()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            trades_receivers: self.trades_receiver_count(),
            latest_receivers: self.latest_tx.receiver_count(),
            aggregates_receivers: self.aggregates_tx.receiver_count(),
        }
    }
}

impl BroadcastPort for BroadcastHub {
    fn publish_trades(&self, trades: &[TradeEvent]) {
        if self.trades_tx.receiver_count() > 0 {
            for trade in trades {
                let _ = self.send_trade(trade.clone());
            }
        }
        metrics::record_trades_published(trades.len() as u64);
    }

    fn publish_snapshots(&self, latest: &LatestTradeSnapshot, aggregates: &AggregateSnapshot) {
        self.latest_tx.send_replace(latest.clone());
        self.aggregates_tx.send_replace(aggregates.clone());
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Trade channel receivers.
    pub trades_receivers: usize,
    /// Latest-trade snapshot receivers.
    pub latest_receivers: usize,
    /// Aggregate snapshot receivers.
    pub aggregates_receivers: usize,
}

impl BroadcastStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.trades_receivers + self.latest_receivers + self.aggregates_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================
