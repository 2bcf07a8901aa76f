//! Trade Ingestion Pipeline
//!
//! Validates raw frames, updates the latest-value store and the rolling
//! aggregator, and publishes the resulting snapshots.
//!
//! [`TradePipeline`] is the synchronous core: it takes a batch of raw frames
//! plus "now" and returns the updated immutable snapshots, so it can be
//! exercised without a socket. [`PipelineRunner`] drives it from the
//! dispatch channel on a single task, which is the only writer of either
//! store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BatchSummary, BroadcastPort, Clock, RawTradeFrame, StatusPort,
};
use crate::domain::aggregation::{AggregateSnapshot, AggregatorError, RollingAggregator};
use crate::domain::latest::{LatestTradeSnapshot, LatestTradeStore};
use crate::domain::trade::{RejectReason, TradeEvent, normalize};

/// Default maximum frames folded into one batch.
pub const DEFAULT_MAX_BATCH: usize = 512;

/// Default interval at which idle windows are advanced.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trailing aggregation window in milliseconds.
    pub window_ms: i64,
    /// Maximum frames drained per batch.
    pub max_batch: usize,
    /// Interval of window refreshes when no trades arrive.
    pub refresh_interval: Duration,
    /// Log rejected payloads.
    pub diagnostics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_ms: crate::domain::aggregation::DEFAULT_WINDOW_MS,
            max_batch: DEFAULT_MAX_BATCH,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            diagnostics: false,
        }
    }
}

// =============================================================================
// Batch Outcome
// =============================================================================

/// Result of ingesting one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Trades that passed validation, in arrival order.
    pub accepted: Vec<TradeEvent>,
    /// Reasons for every rejected frame, in arrival order.
    pub rejected: Vec<RejectReason>,
    /// Latest-trade snapshot after the batch.
    pub latest: LatestTradeSnapshot,
    /// Aggregate snapshot after the batch.
    pub aggregates: AggregateSnapshot,
}

impl BatchOutcome {
    /// Counters for status reporting.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            frames: self.accepted.len() + self.rejected.len(),
            accepted: self.accepted.len(),
            rejected: self.rejected.len(),
            active_symbols: self.aggregates.len(),
            known_symbols: self.latest.len(),
            elapsed: Duration::ZERO,
        }
    }
}

// =============================================================================
// Trade Pipeline
// =============================================================================

/// Owns the latest-value store and the rolling aggregator.
#[derive(Debug)]
pub struct TradePipeline {
    store: LatestTradeStore,
    aggregator: RollingAggregator,
    diagnostics: bool,
}

impl TradePipeline {
    /// Create a pipeline with the given aggregation window.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::InvalidWindow`] for a non-positive window.
    pub fn new(window_ms: i64) -> Result<Self, AggregatorError> {
        Ok(Self {
            store: LatestTradeStore::new(),
            aggregator: RollingAggregator::new(window_ms)?,
            diagnostics: false,
        })
    }

    /// Enable or disable logging of rejected payloads.
    #[must_use]
    pub const fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Validate a batch of frames and fold the accepted trades into both
    /// stores.
    ///
    /// Rejected frames leave both stores untouched.
    pub fn ingest_batch<I>(&mut self, frames: I, now_ms: i64) -> BatchOutcome
    where
        I: IntoIterator<Item = RawTradeFrame>,
    {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for frame in frames {
            match normalize(&frame.payload) {
                Ok(trade) => accepted.push(trade),
                Err(reason) => {
                    if self.diagnostics {
                        tracing::debug!(
                            reason = reason.as_str(),
                            payload = %frame.payload,
                            "Rejected trade payload"
                        );
                    }
                    rejected.push(reason);
                }
            }
        }

        if !accepted.is_empty() {
            self.store.update_all(accepted.iter().cloned());
            self.aggregator.ingest(accepted.iter().cloned(), now_ms);
        }

        BatchOutcome {
            accepted,
            rejected,
            latest: self.store.snapshot(),
            aggregates: self.aggregator.snapshot(),
        }
    }

    /// Advance the aggregation window to `now_ms` without new trades.
    pub fn refresh(&mut self, now_ms: i64) -> AggregateSnapshot {
        self.aggregator.advance(now_ms)
    }

    /// Current latest-trade snapshot.
    #[must_use]
    pub fn latest(&self) -> LatestTradeSnapshot {
        self.store.snapshot()
    }

    /// Current aggregate snapshot.
    #[must_use]
    pub fn aggregates(&self) -> AggregateSnapshot {
        self.aggregator.snapshot()
    }

    /// Aggregation window in milliseconds.
    #[must_use]
    pub const fn window_ms(&self) -> i64 {
        self.aggregator.window_ms()
    }
}

// =============================================================================
// Pipeline Runner
// =============================================================================

/// Drives a [`TradePipeline`] from the dispatch channel.
pub struct PipelineRunner {
    pipeline: TradePipeline,
    frames: mpsc::Receiver<RawTradeFrame>,
    broadcast: Arc<dyn BroadcastPort>,
    status: Arc<dyn StatusPort>,
    clock: Arc<dyn Clock>,
    max_batch: usize,
    refresh_interval: Duration,
    cancel: CancellationToken,
}

impl PipelineRunner {
    /// Create a runner.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::InvalidWindow`] for a non-positive window.
    pub fn new(
        config: &PipelineConfig,
        frames: mpsc::Receiver<RawTradeFrame>,
        broadcast: Arc<dyn BroadcastPort>,
        status: Arc<dyn StatusPort>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Result<Self, AggregatorError> {
        let pipeline = TradePipeline::new(config.window_ms)?.with_diagnostics(config.diagnostics);

        Ok(Self {
            pipeline,
            frames,
            broadcast,
            status,
            clock,
            max_batch: config.max_batch.max(1),
            refresh_interval: config.refresh_interval,
            cancel,
        })
    }

    /// Process frames until cancelled or the dispatch channel closes.
    pub async fn run(mut self) {
        let mut buffer = Vec::with_capacity(self.max_batch);
        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            window_ms = self.pipeline.window_ms(),
            max_batch = self.max_batch,
            "Trade pipeline started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!("Trade pipeline cancelled");
                    break;
                }
                received = self.frames.recv_many(&mut buffer, self.max_batch) => {
                    if received == 0 {
                        tracing::info!("Dispatch channel closed, stopping trade pipeline");
                        break;
                    }
                    self.process_batch(&mut buffer);
                }
                _ = refresh.tick() => {
                    self.process_refresh();
                }
            }
        }
    }

    fn process_batch(&mut self, buffer: &mut Vec<RawTradeFrame>) {
        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        let outcome = self.pipeline.ingest_batch(buffer.drain(..), now_ms);

        for reason in &outcome.rejected {
            self.status.record_rejection(*reason);
        }

        if !outcome.accepted.is_empty() {
            self.broadcast.publish_trades(&outcome.accepted);
            self.broadcast
                .publish_snapshots(&outcome.latest, &outcome.aggregates);
        }

        let mut summary = outcome.summary();
        summary.elapsed = started.elapsed();
        self.status.record_batch(&summary, now_ms);

        tracing::debug!(
            frames = summary.frames,
            accepted = summary.accepted,
            rejected = summary.rejected,
            active_symbols = summary.active_symbols,
            elapsed_us = summary.elapsed.as_micros(),
            "Processed trade batch"
        );
    }

    fn process_refresh(&mut self) {
        let now_ms = self.clock.now_ms();
        let before = self.pipeline.aggregates().len();
        let aggregates = self.pipeline.refresh(now_ms);

        if aggregates.len() != before {
            tracing::debug!(
                evicted = before - aggregates.len(),
                active_symbols = aggregates.len(),
                "Evicted idle symbols"
            );
        }

        self.broadcast
            .publish_snapshots(&self.pipeline.latest(), &aggregates);
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::application::ports::MockClock;

    const T0: i64 = 1_700_000_000_000;

    fn frame(payload: serde_json::Value) -> RawTradeFrame {
        RawTradeFrame::new(payload, T0)
    }

    #[test]
    fn valid_and_invalid_frames_are_split() {
        let mut pipeline = TradePipeline::new(60_000).unwrap();
        let outcome = pipeline.ingest_batch(
            [
                frame(json!({"symbol": "aapl", "price": 100, "size": 50, "timestamp": T0})),
                frame(json!({"symbol": "X", "price": "abc"})),
                frame(json!("garbage")),
            ],
            T0,
        );

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.rejected,
            vec![RejectReason::InvalidPrice, RejectReason::NotAnObject]
        );
        assert!(outcome.latest.get("AAPL").is_some());

        let summary = outcome.summary();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.active_symbols, 1);
    }

    #[test]
    fn rejected_batch_does_not_mutate() {
        let mut pipeline = TradePipeline::new(60_000).unwrap();
        let outcome =
            pipeline.ingest_batch([frame(json!({"symbol": "X", "price": "abc"}))], T0);

        assert!(outcome.accepted.is_empty());
        assert!(outcome.latest.is_empty());
        assert!(outcome.aggregates.is_empty());
    }

    #[test]
    fn refresh_evicts_expired_symbols() {
        let mut pipeline = TradePipeline::new(60_000).unwrap();
        pipeline.ingest_batch(
            [frame(json!({"symbol": "MSFT", "price": 300, "size": 10, "timestamp": T0}))],
            T0,
        );
        assert!(pipeline.aggregates().contains("MSFT"));

        let aggregates = pipeline.refresh(T0 + 61_000);
        assert!(!aggregates.contains("MSFT"));
        // The latest trade is never evicted.
        assert!(pipeline.latest().get("MSFT").is_some());
    }

    #[test]
    fn invalid_window_fails_fast() {
        assert!(TradePipeline::new(-5).is_err());
    }

    #[derive(Default)]
    struct RecordingPorts {
        trades: Mutex<Vec<TradeEvent>>,
        snapshots: Mutex<usize>,
        batches: Mutex<Vec<(BatchSummary, i64)>>,
        rejections: Mutex<Vec<RejectReason>>,
    }

    impl BroadcastPort for RecordingPorts {
        fn publish_trades(&self, trades: &[TradeEvent]) {
            self.trades.lock().extend_from_slice(trades);
        }

        fn publish_snapshots(&self, _: &LatestTradeSnapshot, _: &AggregateSnapshot) {
            *self.snapshots.lock() += 1;
        }
    }

    impl StatusPort for RecordingPorts {
        fn record_batch(&self, summary: &BatchSummary, processed_at_ms: i64) {
            self.batches.lock().push((*summary, processed_at_ms));
        }

        fn record_rejection(&self, reason: RejectReason) {
            self.rejections.lock().push(reason);
        }
    }

    #[tokio::test]
    async fn runner_processes_frames_until_channel_closes() {
        let (tx, rx) = mpsc::channel(16);
        let ports = Arc::new(RecordingPorts::default());
        let mut clock = MockClock::new();
        clock.expect_now_ms().return_const(T0 + 1_000);

        let config = PipelineConfig {
            refresh_interval: Duration::from_secs(3600),
            ..PipelineConfig::default()
        };
        let runner = PipelineRunner::new(
            &config,
            rx,
            ports.clone(),
            ports.clone(),
            Arc::new(clock),
            CancellationToken::new(),
        )
        .unwrap();

        tx.send(frame(json!({"symbol": "tsla", "price": "200", "size": "3", "timestamp": T0})))
            .await
            .unwrap();
        tx.send(frame(json!({"symbol": "", "price": 1, "size": 1, "timestamp": T0})))
            .await
            .unwrap();
        drop(tx);

        runner.run().await;

        let trades = ports.trades.lock();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "TSLA");
        assert_eq!(*ports.rejections.lock(), vec![RejectReason::InvalidSymbol]);

        let batches = ports.batches.lock();
        let accepted: usize = batches.iter().map(|(s, _)| s.accepted).sum();
        assert_eq!(accepted, 1);
        assert!(batches.iter().all(|(_, at)| *at == T0 + 1_000));
    }

    #[tokio::test]
    async fn runner_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel(16);
        let ports = Arc::new(RecordingPorts::default());
        let mut clock = MockClock::new();
        clock.expect_now_ms().return_const(T0);
        let cancel = CancellationToken::new();

        let runner = PipelineRunner::new(
            &PipelineConfig::default(),
            rx,
            ports.clone(),
            ports,
            Arc::new(clock),
            cancel.clone(),
        )
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner.run())
            .await
            .unwrap();
    }
}
