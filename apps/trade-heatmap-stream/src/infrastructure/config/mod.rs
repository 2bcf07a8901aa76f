//! Configuration Module
//!
//! Configuration loading for the trade heatmap stream.

mod settings;

pub use settings::{
    AggregationSettings, AppEnvironment, BroadcastSettings, ConfigError, FeedConfig,
    GatewaySettings, SOCKET_IO_PATH, ServerSettings,
};
