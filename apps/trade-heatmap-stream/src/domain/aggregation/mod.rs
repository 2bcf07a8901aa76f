//! Rolling Volume Aggregation
//!
//! Maintains, per symbol, the trades that fall inside a trailing time window
//! and derives volume, trade count and last-update time from them.
//!
//! # Algorithm
//!
//! For every batch:
//! 1. append each trade to its symbol's history (arrival order),
//! 2. compute `cutoff = now - window_ms`,
//! 3. compact touched histories to trades with `timestamp_ms >= cutoff`,
//! 4. recompute the aggregate from the compacted history,
//! 5. drop symbols whose history became empty.
//!
//! A whole batch is folded before anything is recomputed, so a snapshot
//! never reflects part of a batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::trade::{Symbol, TradeEvent};

/// Default trailing window (one minute).
pub const DEFAULT_WINDOW_MS: i64 = 60_000;

/// Errors raised when configuring an aggregator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    /// Window length must be strictly positive.
    #[error("aggregation window must be positive, got {0} ms")]
    InvalidWindow(i64),
}

/// Windowed statistics for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowedAggregate {
    /// Sum of trade sizes inside the window.
    pub volume: f64,
    /// Number of trades inside the window.
    pub trade_count: usize,
    /// Latest retained trade timestamp, or the observation time when the
    /// history is empty.
    pub last_update: i64,
}

impl WindowedAggregate {
    /// Compute the aggregate of a history slice observed at `now_ms`.
    #[must_use]
    pub fn from_history(history: &[TradeEvent], now_ms: i64) -> Self {
        Self {
            volume: history.iter().map(|t| t.size).sum(),
            trade_count: history.len(),
            last_update: history
                .iter()
                .map(|t| t.timestamp_ms)
                .max()
                .unwrap_or(now_ms),
        }
    }
}

/// Immutable view of every symbol's aggregate.
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    aggregates: Arc<HashMap<Symbol, WindowedAggregate>>,
}

impl Serialize for AggregateSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.aggregates.as_ref().serialize(serializer)
    }
}

impl AggregateSnapshot {
    /// Aggregate for a symbol, if it has trades in the window.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&WindowedAggregate> {
        self.aggregates
            .get(symbol)
            .or_else(|| self.aggregates.get(&symbol.to_uppercase()))
    }

    /// Whether the symbol has an aggregate.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Number of active symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    /// Whether no symbol is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Iterate over `(symbol, aggregate)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &WindowedAggregate)> {
        self.aggregates.iter()
    }

    /// Sum of all symbols' volume.
    #[must_use]
    pub fn total_volume(&self) -> f64 {
        self.aggregates.values().map(|a| a.volume).sum()
    }
}

/// Per-symbol trailing-window aggregator.
#[derive(Debug)]
pub struct RollingAggregator {
    window_ms: i64,
    history: HashMap<Symbol, Vec<TradeEvent>>,
    aggregates: Arc<HashMap<Symbol, WindowedAggregate>>,
}

impl RollingAggregator {
    /// Create an aggregator with the given window length.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::InvalidWindow`] if `window_ms <= 0`.
    pub fn new(window_ms: i64) -> Result<Self, AggregatorError> {
        if window_ms <= 0 {
            return Err(AggregatorError::InvalidWindow(window_ms));
        }

        Ok(Self {
            window_ms,
            history: HashMap::new(),
            aggregates: Arc::new(HashMap::new()),
        })
    }

    /// Create an aggregator with [`DEFAULT_WINDOW_MS`].
    #[must_use]
    pub fn with_default_window() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            history: HashMap::new(),
            aggregates: Arc::new(HashMap::new()),
        }
    }

    /// Window length in milliseconds.
    #[must_use]
    pub const fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Fold a batch of trades and recompute every symbol it touched.
    pub fn ingest<I>(&mut self, events: I, now_ms: i64) -> AggregateSnapshot
    where
        I: IntoIterator<Item = TradeEvent>,
    {
        let mut touched: HashSet<Symbol> = HashSet::new();

        for event in events {
            if !touched.contains(&event.symbol) {
                touched.insert(event.symbol.clone());
            }
            self.history
                .entry(event.symbol.clone())
                .or_default()
                .push(event);
        }

        if !touched.is_empty() {
            self.recompute(touched, now_ms);
        }

        self.snapshot()
    }

    /// Advance the window to `now_ms`, recomputing every tracked symbol.
    ///
    /// Trades that fell out of the window stop contributing and symbols with
    /// nothing left are removed.
    pub fn advance(&mut self, now_ms: i64) -> AggregateSnapshot {
        let symbols: Vec<Symbol> = self.history.keys().cloned().collect();
        if !symbols.is_empty() {
            self.recompute(symbols, now_ms);
        }
        self.snapshot()
    }

    /// Current aggregates.
    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            aggregates: Arc::clone(&self.aggregates),
        }
    }

    /// Number of symbols with trades in the window.
    #[must_use]
    pub fn tracked_symbols(&self) -> usize {
        self.history.len()
    }

    /// Total trades retained across all histories.
    #[must_use]
    pub fn retained_trades(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    fn recompute<I>(&mut self, symbols: I, now_ms: i64)
    where
        I: IntoIterator<Item = Symbol>,
    {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let aggregates = Arc::make_mut(&mut self.aggregates);

        for symbol in symbols {
            let Some(history) = self.history.get_mut(&symbol) else {
                continue;
            };

            history.retain(|trade| trade.is_at_or_after(cutoff));

            if history.is_empty() {
                self.history.remove(&symbol);
                aggregates.remove(&symbol);
                continue;
            }

            let aggregate = WindowedAggregate::from_history(history, now_ms);
            aggregates.insert(symbol, aggregate);
        }
    }
}

impl Default for RollingAggregator {
    fn default() -> Self {
        Self::with_default_window()
    }
}
