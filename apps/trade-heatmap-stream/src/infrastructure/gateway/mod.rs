//! Trade Gateway Adapters
//!
//! Socket.IO client for the upstream trade gateway:
//!
//! - **codec**: Engine.IO / Socket.IO text framing
//! - **websocket**: `tokio-tungstenite` transport
//! - **reconnect**: exponential backoff with jitter
//! - **status**: shared connection and ingestion status
//! - **client**: the connection manager tying them together

pub mod client;
pub mod codec;
pub mod reconnect;
pub mod status;
pub mod websocket;

pub use client::{ConnectionManager, GatewayConfig, GatewayError};
pub use codec::{CodecError, EnginePacket, OpenHandshake, SocketIoCodec, SocketPacket};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use status::{ConnectionState, ConnectionStatus, FeedStatus};
pub use websocket::WebSocketTransport;
