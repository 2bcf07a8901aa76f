//! Trade Event Types
//!
//! Canonical, post-normalization representation of a single executed trade.
//! Everything downstream of the validator (store, aggregator, broadcast)
//! works exclusively with [`TradeEvent`].

mod normalize;

use serde::{Deserialize, Serialize};

pub use normalize::{RejectReason, normalize};

/// Instrument symbol, always uppercase once stored.
pub type Symbol = String;

/// Kind tag of a market data event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// A single executed trade.
    #[default]
    Trade,
    /// An aggregated bar. Modelled for completeness, never produced here.
    Bar,
}

impl TradeKind {
    /// Get the kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Bar => "bar",
        }
    }
}

/// A validated, normalized trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    /// Uppercase instrument symbol.
    pub symbol: Symbol,
    /// Execution price (finite, non-negative).
    pub price: f64,
    /// Trade quantity (finite, non-negative).
    pub size: f64,
    /// Execution time in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Event kind, always [`TradeKind::Trade`] for normalized trades.
    pub kind: TradeKind,
}

impl TradeEvent {
    /// Create a trade, uppercasing the symbol.
    #[must_use]
    pub fn new(symbol: &str, price: f64, size: f64, timestamp_ms: i64) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            price,
            size,
            timestamp_ms,
            kind: TradeKind::Trade,
        }
    }

    /// Whether the trade falls at or after the given cutoff.
    #[must_use]
    pub const fn is_at_or_after(&self, cutoff_ms: i64) -> bool {
        self.timestamp_ms >= cutoff_ms
    }
}
