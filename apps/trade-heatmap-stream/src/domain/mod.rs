//! Domain Layer - Trade types and pure aggregation logic.
//!
//! Nothing in this layer performs I/O or touches the clock; every operation
//! takes its inputs (including "now") explicitly.

/// Canonical trade events and payload normalization.
pub mod trade;

/// Latest trade per symbol.
pub mod latest;

/// Trailing-window volume aggregation.
pub mod aggregation;

/// Volume to display size transform.
pub mod sizing;
