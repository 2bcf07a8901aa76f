//! Trade Payload Normalization
//!
//! Turns a raw inbound `trade_update` payload into a [`TradeEvent`].
//!
//! The gateway is loose about representations: `price` and `size` may arrive
//! as JSON numbers or numeric strings, and `timestamp` as epoch milliseconds
//! or an ISO-8601 string. Anything that cannot be coerced into a finite
//! value is rejected with a [`RejectReason`]; nothing here panics.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use super::TradeEvent;

/// Largest absolute epoch-millisecond value accepted (±100 million days).
const MAX_EPOCH_MS: f64 = 8.64e15;

/// Why a raw payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RejectReason {
    /// Payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,
    /// `symbol` is missing, not a string, or blank.
    #[error("symbol is missing or empty")]
    InvalidSymbol,
    /// `price` cannot be coerced to a finite, non-negative number.
    #[error("price is not a finite non-negative number")]
    InvalidPrice,
    /// `size` cannot be coerced to a finite, non-negative number.
    #[error("size is not a finite non-negative number")]
    InvalidSize,
    /// `timestamp` cannot be resolved to epoch milliseconds.
    #[error("timestamp is not epoch milliseconds or ISO-8601")]
    InvalidTimestamp,
}

impl RejectReason {
    /// Label used for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::InvalidSymbol => "invalid_symbol",
            Self::InvalidPrice => "invalid_price",
            Self::InvalidSize => "invalid_size",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

/// Validate and normalize a raw trade payload.
///
/// # Errors
///
/// Returns the first [`RejectReason`] encountered, checking fields in the
/// order symbol, price, size, timestamp.
pub fn normalize(raw: &Value) -> Result<TradeEvent, RejectReason> {
    let object = raw.as_object().ok_or(RejectReason::NotAnObject)?;

    let symbol = symbol_field(object)?;
    let price = amount_field(object, "price").ok_or(RejectReason::InvalidPrice)?;
    let size = amount_field(object, "size").ok_or(RejectReason::InvalidSize)?;
    let timestamp_ms = object
        .get("timestamp")
        .and_then(coerce_timestamp_ms)
        .ok_or(RejectReason::InvalidTimestamp)?;

    Ok(TradeEvent::new(symbol, price, size, timestamp_ms))
}

fn symbol_field(object: &Map<String, Value>) -> Result<&str, RejectReason> {
    object
        .get("symbol")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RejectReason::InvalidSymbol)
}

fn amount_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    object
        .get(key)
        .and_then(coerce_number)
        .filter(|v| *v >= 0.0)
}

/// Coerce a JSON number or numeric string to a finite `f64`.
fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }?;

    number.is_finite().then_some(number)
}

/// Resolve a timestamp field to epoch milliseconds.
fn coerce_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let millis = n.as_f64()?;
            if !millis.is_finite() || millis.abs() > MAX_EPOCH_MS {
                return None;
            }
            #[allow(clippy::cast_possible_truncation)]
            Some(millis.trunc() as i64)
        }
        Value::String(s) => parse_iso8601_ms(s.trim()),
        _ => None,
    }
}

/// Parse an ISO-8601 string. Offsets are honoured; strings without an
/// offset are read as UTC.
fn parse_iso8601_ms(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
