//! Latest-Value Store
//!
//! Keeps the most recent trade per symbol. The map lives behind an `Arc` and
//! is updated copy-on-write: handing out a snapshot is a reference-count
//! bump, and the next write clones the map only while a snapshot is still
//! alive. Readers therefore never observe a half-applied update and never
//! hold up the writer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::trade::{Symbol, TradeEvent};

/// Immutable view of the latest trade per symbol.
#[derive(Debug, Clone, Default)]
pub struct LatestTradeSnapshot {
    trades: Arc<HashMap<Symbol, TradeEvent>>,
}

impl Serialize for LatestTradeSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.trades.as_ref().serialize(serializer)
    }
}

impl LatestTradeSnapshot {
    /// Latest trade for a symbol (case-insensitive lookup).
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&TradeEvent> {
        self.trades
            .get(symbol)
            .or_else(|| self.trades.get(&symbol.to_uppercase()))
    }

    /// Number of symbols seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    /// Whether no trade has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Iterate over `(symbol, trade)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &TradeEvent)> {
        self.trades.iter()
    }

    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &HashMap<Symbol, TradeEvent> {
        &self.trades
    }
}

/// Symbol -> most recent trade. Entries are overwritten, never evicted.
#[derive(Debug, Default)]
pub struct LatestTradeStore {
    trades: Arc<HashMap<Symbol, TradeEvent>>,
}

impl LatestTradeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for `event.symbol`.
    pub fn update(&mut self, event: TradeEvent) {
        Arc::make_mut(&mut self.trades).insert(event.symbol.clone(), event);
    }

    /// Apply a batch of events in order; later events win.
    pub fn update_all<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = TradeEvent>,
    {
        let trades = Arc::make_mut(&mut self.trades);
        for event in events {
            trades.insert(event.symbol.clone(), event);
        }
    }

    /// Current mapping as an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> LatestTradeSnapshot {
        LatestTradeSnapshot {
            trades: Arc::clone(&self.trades),
        }
    }

    /// Number of symbols tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_overwrites_same_symbol() {
        let mut store = LatestTradeStore::new();
        store.update(TradeEvent::new("AAPL", 100.0, 50.0, 1));
        store.update(TradeEvent::new("aapl", 101.0, 70.0, 2));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        let latest = snapshot.get("AAPL").unwrap();
        assert_eq!(latest.timestamp_ms, 2);
        assert!((latest.price - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn later_event_wins_even_with_older_timestamp() {
        let mut store = LatestTradeStore::new();
        store.update_all([
            TradeEvent::new("X", 1.0, 1.0, 200),
            TradeEvent::new("X", 2.0, 1.0, 100),
        ]);
        assert_eq!(store.snapshot().get("X").unwrap().timestamp_ms, 100);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut store = LatestTradeStore::new();
        store.update(TradeEvent::new("MSFT", 300.0, 10.0, 1));
        let before = store.snapshot();

        store.update(TradeEvent::new("MSFT", 301.0, 5.0, 2));
        store.update(TradeEvent::new("TSLA", 200.0, 1.0, 3));

        assert_eq!(before.len(), 1);
        assert_eq!(before.get("MSFT").unwrap().timestamp_ms, 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut store = LatestTradeStore::new();
        store.update(TradeEvent::new("nvda", 1.0, 1.0, 1));
        assert!(store.snapshot().get("nvda").is_some());
    }

    #[test]
    fn empty_store() {
        let store = LatestTradeStore::new();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }
}
