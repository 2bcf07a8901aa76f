//! Trade Heatmap Stream Binary
//!
//! Connects to the trade gateway and serves live heatmap snapshots.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trade-heatmap-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TRADE_GATEWAY_URL`: Gateway base URL (ws, wss, http or https)
//!
//! ## Optional
//! - `APP_ENV`: development | production (default: development)
//! - `TRADE_GATEWAY_EVENT`: Trade event name (default: `trade_update`)
//! - `TRADE_GATEWAY_NAMESPACE`: Socket.IO namespace (default: /)
//! - `TRADE_GATEWAY_SUBSCRIBE_SYMBOLS`: Comma-separated symbols to subscribe to
//! - `HEATMAP_WINDOW_MS`: Aggregation window (default: 60000)
//! - `HEATMAP_SCALE_FACTOR`: Sizing scale factor (default: 0.1)
//! - `HEATMAP_HEALTH_PORT`: Health and snapshot HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trade_heatmap_stream::application::ports::{Clock, SystemClock};
use trade_heatmap_stream::infrastructure::health::{HealthServer, HealthServerState};
use trade_heatmap_stream::infrastructure::telemetry;
use trade_heatmap_stream::{
    BroadcastConfig, BroadcastHub, ConnectionManager, FeedConfig, FeedStatus, GatewayConfig,
    PipelineConfig, PipelineRunner, Sizer, WebSocketTransport, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting trade heatmap stream");

    let _metrics_handle = init_metrics();

    let config = FeedConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));
    let feed_status = Arc::new(FeedStatus::new());
    let sizer = Sizer::new(config.aggregation.scale_factor)?;

    // Dispatch channel: wired once, outlives every gateway session
    let (dispatch_tx, dispatch_rx) = mpsc::channel(config.aggregation.dispatch_capacity);

    let pipeline_config = PipelineConfig {
        window_ms: config.aggregation.window_ms,
        max_batch: config.aggregation.max_batch,
        refresh_interval: config.aggregation.refresh_interval,
        diagnostics: config.environment.diagnostics_enabled(),
    };
    let pipeline = PipelineRunner::new(
        &pipeline_config,
        dispatch_rx,
        Arc::clone(&broadcast_hub) as _,
        Arc::clone(&feed_status) as _,
        Arc::clone(&clock),
        shutdown_token.clone(),
    )?;
    let pipeline_handle = tokio::spawn(pipeline.run());

    let connection = Arc::new(
        ConnectionManager::new(
            GatewayConfig::from_settings(&config.gateway),
            Arc::new(WebSocketTransport::new()),
            dispatch_tx,
        )
        .with_status(Arc::clone(&feed_status))
        .with_clock(clock)
        .with_parent_cancellation(&shutdown_token),
    );
    connection.start();

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_status),
        Arc::clone(&broadcast_hub),
        sizer,
        config.aggregation.window_ms,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Trade heatmap stream ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        connection.stop().await;
        let _ = pipeline_handle.await;
        let _ = health_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting anyway"
        );
    }

    tracing::info!("Trade heatmap stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        event = %config.gateway.event,
        namespace = %config.gateway.namespace,
        subscribe_symbols = config.gateway.subscribe_symbols.len(),
        window_ms = config.aggregation.window_ms,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        socket_url = %config.gateway.socket_url(),
        max_batch = config.aggregation.max_batch,
        refresh_interval_ms = config.aggregation.refresh_interval.as_millis(),
        "Gateway endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel everything.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
