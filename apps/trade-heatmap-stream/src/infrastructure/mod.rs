//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Socket.IO gateway client: codec, transport, backoff, connection manager.
pub mod gateway;

/// Broadcast channel adapters for trades and snapshots.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check and snapshot HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
