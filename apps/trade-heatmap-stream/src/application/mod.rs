//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (transport, clock, dispatch).
pub mod ports;

/// Application services (trade ingestion pipeline).
pub mod services;
