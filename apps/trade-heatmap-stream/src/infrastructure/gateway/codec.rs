//! Socket.IO Codec
//!
//! Decodes and encodes the text framing used by the trade gateway:
//! Engine.IO v4 packets carrying Socket.IO v5 packets.
//!
//! # Engine.IO packets
//!
//! | Prefix | Packet  |
//! |--------|---------|
//! | `0`    | open (JSON handshake) |
//! | `1`    | close   |
//! | `2`    | ping    |
//! | `3`    | pong    |
//! | `4`    | message (Socket.IO packet follows) |
//! | `5`    | upgrade |
//! | `6`    | noop    |
//!
//! # Socket.IO packets (inside `4`)
//!
//! ```text
//! 40                       connect (default namespace)
//! 40/prices,{"sid":"..."}  connect ack with namespace and payload
//! 42["trade_update",{...}] event
//! 4213["event",{...}]      event with ack id 13
//! 41                       disconnect
//! 44{"message":"..."}      connect error
//! ```
//!
//! Binary packets (`45`, `46`) are not used by the gateway and are rejected.

use serde::Deserialize;
use serde_json::Value;

/// Default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was empty.
    #[error("empty frame")]
    Empty,

    /// Unknown Engine.IO or Socket.IO packet type.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(char),

    /// Binary attachments are not supported.
    #[error("binary packets are not supported")]
    UnsupportedBinary,

    /// Structurally invalid packet.
    #[error("invalid packet format: {0}")]
    InvalidFormat(String),
}

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Server ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Time the server waits for a pong, in milliseconds.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

const fn default_ping_interval() -> u64 {
    25_000
}

const fn default_ping_timeout() -> u64 {
    20_000
}

/// Engine.IO transport packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session opened.
    Open(OpenHandshake),
    /// Server is closing the transport.
    Close,
    /// Heartbeat ping; must be answered with a pong.
    Ping,
    /// Heartbeat pong.
    Pong,
    /// Socket.IO packet.
    Message(SocketPacket),
    /// Transport upgrade (unused over a pure WebSocket).
    Upgrade,
    /// No-op.
    Noop,
}

/// Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connected.
    Connect {
        /// Namespace.
        namespace: String,
        /// Handshake payload, if any.
        data: Option<Value>,
    },
    /// Namespace disconnected.
    Disconnect {
        /// Namespace.
        namespace: String,
    },
    /// Named event.
    Event {
        /// Namespace.
        namespace: String,
        /// Acknowledgement id, if the sender expects one.
        id: Option<u64>,
        /// Event name.
        name: String,
        /// Event arguments.
        args: Vec<Value>,
    },
    /// Acknowledgement of an event we emitted.
    Ack {
        /// Namespace.
        namespace: String,
        /// Acknowledgement id.
        id: u64,
        /// Ack arguments.
        args: Vec<Value>,
    },
    /// Namespace connection refused.
    ConnectError {
        /// Namespace.
        namespace: String,
        /// Error payload.
        data: Option<Value>,
    },
}

/// Codec for Engine.IO / Socket.IO text frames.
#[derive(Debug, Default, Clone)]
pub struct SocketIoCodec;

impl SocketIoCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is empty, has an unknown packet type or
    /// carries invalid JSON.
    pub fn decode(&self, text: &str) -> Result<EnginePacket, CodecError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(self.decode_socket_packet(rest)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }

    fn decode_socket_packet(&self, text: &str) -> Result<SocketPacket, CodecError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let (namespace, rest) = split_namespace(chars.as_str());
        let (id, payload) = split_ack_id(rest)?;

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: parse_optional(payload)?,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = parse_args(payload)?;
                if args.is_empty() {
                    return Err(CodecError::InvalidFormat("event without name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(CodecError::InvalidFormat(format!(
                            "event name must be a string, got {other}"
                        )));
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => Ok(SocketPacket::Ack {
                namespace,
                id: id.ok_or_else(|| CodecError::InvalidFormat("ack without id".to_string()))?,
                args: parse_args(payload)?,
            }),
            '4' => Ok(SocketPacket::ConnectError {
                namespace,
                data: parse_optional(payload)?,
            }),
            '5' | '6' => Err(CodecError::UnsupportedBinary),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }

    /// Encode a heartbeat pong.
    #[must_use]
    pub fn encode_pong(&self) -> String {
        "3".to_string()
    }

    /// Encode a namespace connect request.
    #[must_use]
    pub fn encode_connect(&self, namespace: &str, auth: Option<&Value>) -> String {
        let mut out = String::from("40");
        push_namespace(&mut out, namespace, auth.is_some());
        if let Some(auth) = auth {
            out.push_str(&auth.to_string());
        }
        out
    }

    /// Encode an event emission.
    #[must_use]
    pub fn encode_event(&self, namespace: &str, name: &str, payload: &Value) -> String {
        let mut out = String::from("42");
        push_namespace(&mut out, namespace, true);
        out.push_str(&Value::Array(vec![Value::String(name.to_string()), payload.clone()]).to_string());
        out
    }
}

/// Whether two namespace spellings refer to the same namespace.
#[must_use]
pub fn same_namespace(a: &str, b: &str) -> bool {
    normalize_namespace(a) == normalize_namespace(b)
}

fn normalize_namespace(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

fn push_namespace(out: &mut String, namespace: &str, has_payload: bool) {
    if normalize_namespace(namespace) == DEFAULT_NAMESPACE {
        return;
    }
    out.push_str(namespace);
    if has_payload {
        out.push(',');
    }
}

fn split_namespace(text: &str) -> (String, &str) {
    if !text.starts_with('/') {
        return (DEFAULT_NAMESPACE.to_string(), text);
    }

    text.find(',').map_or_else(
        || (text.to_string(), ""),
        |comma| (text[..comma].to_string(), &text[comma + 1..]),
    )
}

fn split_ack_id(text: &str) -> Result<(Option<u64>, &str), CodecError> {
    let digits = text.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return Ok((None, text));
    }

    let id = text[..digits]
        .parse::<u64>()
        .map_err(|e| CodecError::InvalidFormat(format!("ack id: {e}")))?;
    Ok((Some(id), &text[digits..]))
}

fn parse_optional(text: &str) -> Result<Option<Value>, CodecError> {
    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::from_str(text)?))
    }
}

fn parse_args(text: &str) -> Result<Vec<Value>, CodecError> {
    match parse_optional(text)? {
        None => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args),
        Some(other) => Err(CodecError::InvalidFormat(format!(
            "expected argument array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_open_handshake() {
        let codec = SocketIoCodec::new();
        let packet = codec
            .decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#)
            .unwrap();
        assert_eq!(
            packet,
            EnginePacket::Open(OpenHandshake {
                sid: "abc".to_string(),
                ping_interval: 25_000,
                ping_timeout: 20_000,
            })
        );
    }

    #[test]
    fn decode_heartbeat_and_control() {
        let codec = SocketIoCodec::new();
        assert_eq!(codec.decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(codec.decode("3").unwrap(), EnginePacket::Pong);
        assert_eq!(codec.decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(codec.decode("6").unwrap(), EnginePacket::Noop);
    }

    #[test]
    fn decode_connect_ack() {
        let codec = SocketIoCodec::new();
        assert_eq!(
            codec.decode("40").unwrap(),
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/".to_string(),
                data: None,
            })
        );
        assert_eq!(
            codec.decode(r#"40/prices,{"sid":"x"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/prices".to_string(),
                data: Some(json!({"sid": "x"})),
            })
        );
    }

    #[test]
    fn decode_trade_event() {
        let codec = SocketIoCodec::new();
        let packet = codec
            .decode(r#"42["trade_update",{"symbol":"aapl","price":"101","size":70,"timestamp":1}]"#)
            .unwrap();

        let EnginePacket::Message(SocketPacket::Event {
            namespace,
            id,
            name,
            args,
        }) = packet
        else {
            panic!("expected event packet");
        };
        assert_eq!(namespace, "/");
        assert_eq!(id, None);
        assert_eq!(name, "trade_update");
        assert_eq!(args, vec![json!({"symbol":"aapl","price":"101","size":70,"timestamp":1})]);
    }

    #[test]
    fn decode_event_with_namespace_and_ack_id() {
        let codec = SocketIoCodec::new();
        let packet = codec.decode(r#"42/prices,13["ping",{}]"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/prices".to_string(),
                id: Some(13),
                name: "ping".to_string(),
                args: vec![json!({})],
            })
        );
    }

    #[test]
    fn decode_disconnect_and_connect_error() {
        let codec = SocketIoCodec::new();
        assert_eq!(
            codec.decode("41").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect {
                namespace: "/".to_string()
            })
        );
        assert_eq!(
            codec.decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/".to_string(),
                data: Some(json!({"message": "Not authorized"})),
            })
        );
    }

    #[test]
    fn decode_errors() {
        let codec = SocketIoCodec::new();
        assert!(matches!(codec.decode(""), Err(CodecError::Empty)));
        assert!(matches!(codec.decode("9"), Err(CodecError::UnknownPacketType('9'))));
        assert!(matches!(codec.decode("451-[\"x\",{}]"), Err(CodecError::UnsupportedBinary)));
        assert!(matches!(codec.decode("42[1,2]"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(codec.decode("42[]"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(codec.decode("42{not json"), Err(CodecError::Json(_))));
        assert!(matches!(codec.decode("0{}"), Err(CodecError::Json(_))));
    }

    #[test]
    fn encode_packets() {
        let codec = SocketIoCodec::new();
        assert_eq!(codec.encode_pong(), "3");
        assert_eq!(codec.encode_connect("/", None), "40");
        assert_eq!(codec.encode_connect("/prices", None), "40/prices");
        assert_eq!(
            codec.encode_connect("/prices", Some(&json!({"token": "t"}))),
            r#"40/prices,{"token":"t"}"#
        );
        assert_eq!(
            codec.encode_event("/", "subscribe", &json!({"symbols": ["AAPL"]})),
            r#"42["subscribe",{"symbols":["AAPL"]}]"#
        );
        assert_eq!(
            codec.encode_event("/prices", "subscribe", &json!({})),
            r#"42/prices,["subscribe",{}]"#
        );
    }

    #[test]
    fn namespace_equivalence() {
        assert!(same_namespace("", "/"));
        assert!(same_namespace("/prices", "/prices"));
        assert!(!same_namespace("/prices", "/"));
    }
}
