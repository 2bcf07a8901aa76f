//! Connection Manager Integration Tests
//!
//! Drives the connection manager against an in-memory transport whose
//! server side is scripted by each test.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use trade_heatmap_stream::application::ports::{Session, Transport, TransportError};
use trade_heatmap_stream::infrastructure::gateway::ReconnectConfig;
use trade_heatmap_stream::{
    ConnectionManager, ConnectionState, GatewayConfig, RawTradeFrame,
};

const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// In-memory transport
// =============================================================================

/// Server side of one accepted session.
struct ServerEnd {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    fn send(&self, frame: &str) {
        let _ = self.to_client.send(frame.to_string());
    }

    async fn expect_frame(&mut self) -> String {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("client frame in time")
            .expect("client still connected")
    }

    /// Engine.IO open, namespace connect, ack.
    async fn handshake(&mut self, ping_interval: u64, ping_timeout: u64) {
        self.send(&format!(
            r#"0{{"sid":"sid-1","upgrades":[],"pingInterval":{ping_interval},"pingTimeout":{ping_timeout}}}"#
        ));
        assert_eq!(self.expect_frame().await, "40");
        self.send(r#"40{"sid":"ns-1"}"#);
    }

    fn emit_trade(&self, payload: &Value) {
        self.send(&format!(r#"42["trade_update",{payload}]"#));
    }
}

struct MemoryTransport {
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryTransport {
    fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, server_ends) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            failures_remaining: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            accepted,
        });
        (transport, server_ends)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Session>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerEnd {
            to_client,
            from_client,
        });

        Ok(Box::new(MemorySession {
            incoming,
            outgoing,
        }))
    }
}

struct MemorySession {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Session for MemorySession {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Send("peer gone".to_string()))
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..GatewayConfig::new("ws://gateway.test/socket.io/?EIO=4&transport=websocket")
    }
}

fn manager(
    config: GatewayConfig,
    transport: Arc<MemoryTransport>,
) -> (Arc<ConnectionManager>, mpsc::Receiver<RawTradeFrame>) {
    let (tx, rx) = mpsc::channel(64);
    (Arc::new(ConnectionManager::new(config, transport, tx)), rx)
}

async fn next_server(server_ends: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    timeout(WAIT, server_ends.recv())
        .await
        .expect("connection attempt in time")
        .expect("transport alive")
}

async fn next_frame(rx: &mut mpsc::Receiver<RawTradeFrame>) -> RawTradeFrame {
    timeout(WAIT, rx.recv())
        .await
        .expect("dispatched frame in time")
        .expect("dispatch open")
}

async fn eventually(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn connects_and_dispatches_trade_events() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, mut rx) = manager(fast_config(), transport);

    assert!(manager.start());
    let mut server = next_server(&mut server_ends).await;
    server.handshake(25_000, 20_000).await;

    eventually(|| manager.status().connected).await;

    let payload = json!({"symbol": "aapl", "price": 190.1, "size": 50, "timestamp": 1});
    server.emit_trade(&payload);

    let frame = next_frame(&mut rx).await;
    assert_eq!(frame.payload, payload);
    eventually(|| manager.status().frames_received == 1).await;

    manager.stop().await;
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Stopped);
    assert!(!status.connected);
}

#[tokio::test]
async fn malformed_payloads_pass_through_untouched() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, mut rx) = manager(fast_config(), transport);

    manager.start();
    let mut server = next_server(&mut server_ends).await;
    server.handshake(25_000, 20_000).await;

    server.emit_trade(&json!({"symbol": "X", "price": "abc"}));
    server.send(r#"42["trade_update","not an object"]"#);
    server.send("this is not engine.io");
    server.send(r#"42["price_alert",{"symbol":"AAPL"}]"#);

    assert_eq!(
        next_frame(&mut rx).await.payload,
        json!({"symbol": "X", "price": "abc"})
    );
    assert_eq!(next_frame(&mut rx).await.payload, json!("not an object"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unrelated events are not dispatched");
    assert!(manager.status().connected);

    manager.stop().await;
}

#[tokio::test]
async fn reconnect_never_double_delivers() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, mut rx) = manager(fast_config(), Arc::clone(&transport));

    manager.start();
    let mut first = next_server(&mut server_ends).await;
    first.handshake(25_000, 20_000).await;
    first.emit_trade(&json!({"symbol": "A", "price": 1, "size": 1, "timestamp": 1}));
    assert_eq!(next_frame(&mut rx).await.payload["symbol"], "A");

    // Server drops the connection
    drop(first);

    let mut second = next_server(&mut server_ends).await;
    second.handshake(25_000, 20_000).await;
    second.emit_trade(&json!({"symbol": "B", "price": 1, "size": 1, "timestamp": 2}));
    assert_eq!(next_frame(&mut rx).await.payload["symbol"], "B");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(transport.attempts(), 2);

    let status = manager.status();
    assert!(status.connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.frames_received, 2);

    manager.stop().await;
}

#[tokio::test]
async fn retries_until_connect_succeeds() {
    let (transport, mut server_ends) = MemoryTransport::new(3);
    let (manager, _rx) = manager(fast_config(), Arc::clone(&transport));

    manager.start();
    let mut server = next_server(&mut server_ends).await;
    assert_eq!(transport.attempts(), 4);

    server.handshake(25_000, 20_000).await;
    eventually(|| manager.status().connected).await;
    assert_eq!(manager.status().last_error, None);

    manager.stop().await;
}

#[tokio::test]
async fn stop_cancels_pending_backoff() {
    let (transport, _server_ends) = MemoryTransport::new(usize::MAX);
    let config = GatewayConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..fast_config()
    };
    let (manager, _rx) = manager(config, transport);

    manager.start();
    eventually(|| manager.status().state == ConnectionState::Reconnecting).await;
    let status = manager.status();
    assert_eq!(status.reconnect_attempts, 1);
    assert!(status.last_error.unwrap().contains("connection refused"));

    timeout(Duration::from_secs(1), manager.stop())
        .await
        .expect("stop does not wait out the backoff");
    assert_eq!(manager.status().state, ConnectionState::Stopped);
    assert!(!manager.start(), "a stopped manager stays stopped");
}

#[tokio::test]
async fn start_is_idempotent() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, _rx) = manager(fast_config(), Arc::clone(&transport));

    assert!(manager.start());
    assert!(!manager.start());

    let mut server = next_server(&mut server_ends).await;
    server.handshake(25_000, 20_000).await;
    eventually(|| manager.status().connected).await;

    assert_eq!(transport.attempts(), 1);
    manager.stop().await;
}

#[tokio::test]
async fn subscription_is_restored_after_every_connect() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let config = GatewayConfig {
        subscribe_symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
        ..fast_config()
    };
    let (manager, _rx) = manager(config, transport);
    let expected = r#"42["subscribe",{"symbols":["AAPL","MSFT"]}]"#;

    manager.start();
    let mut first = next_server(&mut server_ends).await;
    first.handshake(25_000, 20_000).await;
    assert_eq!(first.expect_frame().await, expected);
    drop(first);

    let mut second = next_server(&mut server_ends).await;
    second.handshake(25_000, 20_000).await;
    assert_eq!(second.expect_frame().await, expected);

    manager.stop().await;
}

#[tokio::test]
async fn engine_pings_are_answered() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, _rx) = manager(fast_config(), transport);

    manager.start();
    let mut server = next_server(&mut server_ends).await;
    server.handshake(25_000, 20_000).await;

    server.send("2");
    assert_eq!(server.expect_frame().await, "3");

    manager.stop().await;
}

#[tokio::test]
async fn namespace_refusal_triggers_reconnect() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, _rx) = manager(fast_config(), transport);

    manager.start();
    let mut first = next_server(&mut server_ends).await;
    first.send(r#"0{"sid":"s","pingInterval":25000,"pingTimeout":20000}"#);
    assert_eq!(first.expect_frame().await, "40");
    first.send(r#"44{"message":"Not authorized"}"#);

    let _second = next_server(&mut server_ends).await;
    let status = manager.status();
    assert!(!status.connected);
    assert!(status.last_error.unwrap().contains("Not authorized"));

    manager.stop().await;
}

#[tokio::test]
async fn silent_server_trips_heartbeat_watchdog() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, _rx) = manager(fast_config(), transport);

    manager.start();
    let mut first = next_server(&mut server_ends).await;
    first.handshake(30, 30).await;
    eventually(|| manager.status().connected).await;

    // No pings: the session is dropped and a new one opened
    let _second = next_server(&mut server_ends).await;
    assert!(
        manager
            .status()
            .last_error
            .unwrap_or_default()
            .contains("heartbeat")
    );

    drop(first);
    manager.stop().await;
}

#[tokio::test]
async fn closed_dispatch_ends_the_loop() {
    let (transport, mut server_ends) = MemoryTransport::new(0);
    let (manager, rx) = manager(fast_config(), Arc::clone(&transport));
    drop(rx);

    manager.start();
    let mut server = next_server(&mut server_ends).await;
    server.handshake(25_000, 20_000).await;
    eventually(|| manager.status().connected).await;
    server.emit_trade(&json!({"symbol": "A"}));

    eventually(|| manager.status().state == ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.attempts(), 1, "no reconnect without a consumer");

    manager.stop().await;
}
