//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ingestion`: validates raw frames, maintains the latest-value store and
//!   the rolling aggregator, publishes snapshots

pub mod ingestion;

pub use ingestion::{
    BatchOutcome, DEFAULT_MAX_BATCH, DEFAULT_REFRESH_INTERVAL, PipelineConfig, PipelineRunner,
    TradePipeline,
};
