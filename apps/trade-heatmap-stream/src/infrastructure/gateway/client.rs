//! Gateway Connection Manager
//!
//! Owns the single logical connection to the trade gateway.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (drop) -> Reconnecting
//!      ^                                                   |
//!      |                                                   v
//!      +-------------------- (backoff) <-------------- Connecting
//!
//! stop() from any state -> Stopped
//! ```
//!
//! Every session repeats the Socket.IO handshake: wait for the Engine.IO
//! `open`, request the namespace, wait for the ack, then restore the symbol
//! subscription. Trade event payloads are forwarded untouched to the
//! dispatch channel, which is wired once and outlives every session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, EnginePacket, SocketIoCodec, SocketPacket, same_namespace};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::status::{ConnectionState, ConnectionStatus, FeedStatus};
use crate::application::ports::{
    Clock, RawTradeFrame, Session, SystemClock, Transport, TransportError,
};
use crate::infrastructure::config::GatewaySettings;
use crate::infrastructure::metrics;

/// Heartbeat window used until the server announces its own.
const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_millis(45_000);

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a gateway session ended. All of them lead to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Open handshake or namespace ack did not arrive in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// No packet within the server's ping interval plus ping timeout.
    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    /// Server refused the namespace connection.
    #[error("namespace connection refused: {0}")]
    ConnectRefused(String),

    /// Server disconnected the namespace.
    #[error("namespace disconnected by server")]
    NamespaceDisconnected,

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

impl GatewayError {
    /// Metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::ConnectFailed(_)) => "connect_failed",
            Self::Transport(TransportError::ConnectTimeout) => "connect_timeout",
            Self::Transport(TransportError::Receive(_)) => "receive",
            Self::Transport(TransportError::Send(_)) => "send",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ConnectRefused(_) => "connect_refused",
            Self::NamespaceDisconnected => "namespace_disconnected",
            Self::ConnectionClosed => "connection_closed",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Full Engine.IO WebSocket URL.
    pub url: String,
    /// Trade event name.
    pub event: String,
    /// Socket.IO namespace.
    pub namespace: String,
    /// Symbols to subscribe to after each connect.
    pub subscribe_symbols: Vec<String>,
    /// Timeout for the transport connect and the handshake.
    pub connect_timeout: Duration,
    /// Backoff configuration.
    pub reconnect: ReconnectConfig,
}

impl GatewayConfig {
    /// Configuration for `url` with default event, namespace and backoff.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event: "trade_update".to_string(),
            namespace: "/".to_string(),
            subscribe_symbols: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Create configuration from `GatewaySettings`.
    #[must_use]
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            url: settings.socket_url(),
            event: settings.event.clone(),
            namespace: settings.namespace.clone(),
            subscribe_symbols: settings.subscribe_symbols.clone(),
            connect_timeout: settings.connect_timeout,
            reconnect: ReconnectConfig::from_gateway_settings(settings),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

enum SessionEnd {
    Cancelled,
    DispatchClosed,
}

/// Maintains the gateway connection and feeds the dispatch channel.
///
/// Multiple managers can coexist; each owns its task, status and
/// cancellation token.
pub struct ConnectionManager {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    dispatch: mpsc::Sender<RawTradeFrame>,
    status: Arc<FeedStatus>,
    clock: Arc<dyn Clock>,
    codec: SocketIoCodec,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until [`start`](Self::start).
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        dispatch: mpsc::Sender<RawTradeFrame>,
    ) -> Self {
        Self {
            config,
            transport,
            dispatch,
            status: Arc::new(FeedStatus::new()),
            clock: Arc::new(SystemClock),
            codec: SocketIoCodec::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Share an existing status with other components.
    #[must_use]
    pub fn with_status(mut self, status: Arc<FeedStatus>) -> Self {
        self.status = status;
        self
    }

    /// Use a custom clock for frame receive times.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop this manager when `parent` is cancelled.
    ///
    /// [`stop`](Self::stop) still only affects this manager.
    #[must_use]
    pub fn with_parent_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Spawn the connection loop.
    ///
    /// Returns `false` without spawning if the loop is already running or
    /// the manager was stopped.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if self.cancel.is_cancelled() || task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        *task = Some(tokio::spawn(Arc::clone(self).run()));
        true
    }

    /// Cancel the loop and any pending backoff, close the socket and wait
    /// for the task to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Connection task ended abnormally");
            }
        }

        self.status.set_state(ConnectionState::Stopped);
        tracing::info!("Connection manager stopped");
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.snapshot()
    }

    /// Shared status handle.
    #[must_use]
    pub fn feed_status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Run the connection loop until cancelled or the dispatch channel
    /// closes. Transport failures are retried forever.
    pub async fn run(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.connect_and_run(&mut policy).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::DispatchClosed) => {
                    tracing::info!("Dispatch channel closed, stopping connection loop");
                    self.status.set_state(ConnectionState::Disconnected);
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, kind = e.kind(), "Gateway connection error");
                    metrics::record_gateway_error(e.kind());
                    self.status.set_error(e.to_string());
                }
            }

            self.status.increment_reconnect_attempts();
            self.status.set_state(ConnectionState::Reconnecting);

            let delay = policy.next_delay();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to trade gateway"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Connection loop cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status.set_state(ConnectionState::Stopped);
    }

    /// Connect and run one session until it ends.
    async fn connect_and_run(
        &self,
        policy: &mut ReconnectPolicy,
    ) -> Result<SessionEnd, GatewayError> {
        self.status.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to trade gateway");

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&self.config.url),
        );
        let mut session = tokio::select! {
            () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            result = connect => result.map_err(|_| TransportError::ConnectTimeout)??,
        };

        let result = self.run_session(session.as_mut(), policy).await;
        session.close().await;

        if !self.cancel.is_cancelled() {
            self.status.set_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn run_session(
        &self,
        session: &mut dyn Session,
        policy: &mut ReconnectPolicy,
    ) -> Result<SessionEnd, GatewayError> {
        let mut heartbeat_window = DEFAULT_HEARTBEAT_WINDOW;
        let mut namespace_connected = false;
        let mut deadline = Instant::now() + self.config.connect_timeout;

        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    return Err(if namespace_connected {
                        GatewayError::HeartbeatTimeout
                    } else {
                        GatewayError::HandshakeTimeout
                    });
                }
                frame = session.recv() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(GatewayError::ConnectionClosed),
            };

            if namespace_connected {
                deadline = Instant::now() + heartbeat_window;
            }

            let packet = match self.codec.decode(&text) {
                Ok(packet) => packet,
                Err(e) => {
                    log_undecodable(&e, &text);
                    continue;
                }
            };

            match packet {
                EnginePacket::Open(handshake) => {
                    heartbeat_window = Duration::from_millis(
                        handshake.ping_interval.saturating_add(handshake.ping_timeout),
                    );
                    tracing::debug!(
                        sid = %handshake.sid,
                        ping_interval_ms = handshake.ping_interval,
                        ping_timeout_ms = handshake.ping_timeout,
                        "Engine.IO session opened"
                    );
                    session
                        .send(self.codec.encode_connect(&self.config.namespace, None))
                        .await?;
                }
                EnginePacket::Ping => {
                    session.send(self.codec.encode_pong()).await?;
                }
                EnginePacket::Close => return Err(GatewayError::ConnectionClosed),
                EnginePacket::Pong | EnginePacket::Upgrade | EnginePacket::Noop => {}
                EnginePacket::Message(packet) => match packet {
                    SocketPacket::Connect { namespace, .. }
                        if same_namespace(&namespace, &self.config.namespace) =>
                    {
                        namespace_connected = true;
                        deadline = Instant::now() + heartbeat_window;
                        policy.reset();
                        self.status.set_state(ConnectionState::Connected);
                        tracing::info!(namespace = %namespace, "Connected to trade gateway");
                        self.restore_subscription(session).await?;
                    }
                    SocketPacket::Disconnect { namespace }
                        if same_namespace(&namespace, &self.config.namespace) =>
                    {
                        return Err(GatewayError::NamespaceDisconnected);
                    }
                    SocketPacket::ConnectError { namespace, data }
                        if same_namespace(&namespace, &self.config.namespace) =>
                    {
                        return Err(GatewayError::ConnectRefused(connect_error_message(data)));
                    }
                    SocketPacket::Event {
                        namespace,
                        name,
                        args,
                        ..
                    } if name == self.config.event
                        && same_namespace(&namespace, &self.config.namespace) =>
                    {
                        let payload = args.into_iter().next().unwrap_or(Value::Null);
                        if let Some(end) = self.dispatch_frame(payload).await {
                            return Ok(end);
                        }
                    }
                    other => {
                        tracing::trace!(packet = ?other, "Ignoring gateway packet");
                    }
                },
            }
        }
    }

    /// Forward one payload. Returns how the session should end, if it should.
    async fn dispatch_frame(&self, payload: Value) -> Option<SessionEnd> {
        let frame = RawTradeFrame::new(payload, self.clock.now_ms());

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Some(SessionEnd::Cancelled),
            sent = self.dispatch.send(frame) => {
                if sent.is_err() {
                    return Some(SessionEnd::DispatchClosed);
                }
            }
        }

        self.status.increment_frames();
        None
    }

    async fn restore_subscription(&self, session: &mut dyn Session) -> Result<(), GatewayError> {
        if self.config.subscribe_symbols.is_empty() {
            return Ok(());
        }

        let frame = self.codec.encode_event(
            &self.config.namespace,
            "subscribe",
            &json!({ "symbols": self.config.subscribe_symbols }),
        );
        session.send(frame).await?;

        tracing::info!(
            symbols = self.config.subscribe_symbols.len(),
            "Restored symbol subscription"
        );
        Ok(())
    }
}

fn connect_error_message(data: Option<Value>) -> String {
    match data {
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| Value::Object(map.clone()).to_string(), str::to_string),
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => "no reason given".to_string(),
    }
}

fn log_undecodable(error: &CodecError, text: &str) {
    let preview: String = text.chars().take(120).collect();
    tracing::warn!(error = %error, frame = %preview, "Undecodable gateway frame");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let mut settings = GatewaySettings::new("https://gateway.example.com");
        settings.subscribe_symbols = vec!["AAPL".to_string()];
        settings.reconnect_delay_initial = Duration::from_millis(200);

        let config = GatewayConfig::from_settings(&settings);

        assert_eq!(
            config.url,
            "wss://gateway.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(config.event, "trade_update");
        assert_eq!(config.subscribe_symbols, vec!["AAPL"]);
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(200));
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(
            GatewayError::from(TransportError::ConnectTimeout).kind(),
            "connect_timeout"
        );
        assert_eq!(GatewayError::HeartbeatTimeout.kind(), "heartbeat_timeout");
        assert_eq!(
            GatewayError::ConnectRefused("nope".to_string()).to_string(),
            "namespace connection refused: nope"
        );
    }

    #[test]
    fn connect_error_messages() {
        assert_eq!(
            connect_error_message(Some(json!({"message": "Not authorized"}))),
            "Not authorized"
        );
        assert_eq!(connect_error_message(Some(json!("bad"))), "bad");
        assert_eq!(connect_error_message(None), "no reason given");
        assert_eq!(connect_error_message(Some(json!({"code": 1}))), r#"{"code":1}"#);
    }
}
