//! Upstream frame decoding.
//!
//! A frame is a JSON object carrying at least `type` (non-empty string) and
//! `timestamp` (RFC 3339 string or epoch milliseconds). Every other key is
//! kept as an opaque field.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("missing or invalid field '{0}'")]
    MissingField(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("stale frame: {age_secs}s old")]
    Stale { age_secs: i64 },
}

impl ProtocolError {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
            Self::Stale { .. } => "stale",
        }
    }
}

/// A typed upstream message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Frame bytes as received; what compression operates on.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Message {
    /// Build a message locally, encoding its wire form.
    pub fn new(kind: impl Into<String>, timestamp: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        let mut message = Self {
            kind: kind.into(),
            timestamp,
            fields,
            raw: Vec::new(),
        };
        message.raw = serde_json::to_vec(&message).unwrap_or_default();
        message
    }

    /// Wire size in bytes.
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }
}

/// Decode one raw frame. Frames older than `staleness` relative to `now`
/// are rejected.
pub fn parse_frame(
    raw: &[u8],
    now: DateTime<Utc>,
    staleness: Duration,
) -> Result<Message, ProtocolError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::Malformed("frame is not a JSON object".into()));
    };

    let kind = match fields.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => return Err(ProtocolError::MissingField("type")),
    };
    let timestamp = match fields.remove("timestamp") {
        Some(value) => parse_timestamp(&value)?,
        None => return Err(ProtocolError::MissingField("timestamp")),
    };

    let age = now - timestamp;
    let limit = chrono::Duration::from_std(staleness).unwrap_or_else(|_| chrono::Duration::days(1));
    if age > limit {
        return Err(ProtocolError::Stale {
            age_secs: age.num_seconds(),
        });
    }

    Ok(Message {
        kind,
        timestamp,
        fields,
        raw: raw.to_vec(),
    })
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, ProtocolError> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ProtocolError::InvalidTimestamp(format!("{s}: {e}"))),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| ProtocolError::InvalidTimestamp(n.to_string())),
        other => Err(ProtocolError::InvalidTimestamp(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STALENESS: Duration = Duration::from_secs(300);

    #[test]
    fn test_parses_rfc3339_and_keeps_fields() {
        let now = Utc::now();
        let raw = json!({"type": "trade", "timestamp": now.to_rfc3339(), "price": 3150.5});
        let raw = serde_json::to_vec(&raw).unwrap();
        let message = parse_frame(&raw, now, STALENESS).unwrap();
        assert_eq!(message.kind, "trade");
        assert_eq!(message.field_f64("price"), Some(3150.5));
        assert!(!message.fields.contains_key("type"));
        assert_eq!(message.size(), raw.len());
    }

    #[test]
    fn test_parses_epoch_millis() {
        let now = Utc::now();
        let raw = format!(r#"{{"type":"orderbook","timestamp":{}}}"#, now.timestamp_millis());
        let message = parse_frame(raw.as_bytes(), now, STALENESS).unwrap();
        assert_eq!(message.timestamp.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_rejects_bad_frames() {
        let now = Utc::now();
        let cases: [(&[u8], &str); 5] = [
            (b"not json", "malformed"),
            (b"[1,2,3]", "malformed"),
            (br#"{"timestamp": 1}"#, "missing_field"),
            (br#"{"type": "trade"}"#, "missing_field"),
            (br#"{"type": "trade", "timestamp": true}"#, "invalid_timestamp"),
        ];
        for (raw, kind) in cases {
            assert_eq!(parse_frame(raw, now, STALENESS).unwrap_err().kind(), kind);
        }
    }

    #[test]
    fn test_rejects_stale_frame() {
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(6);
        let raw = serde_json::to_vec(&json!({"type": "trade", "timestamp": old.to_rfc3339()})).unwrap();
        assert!(matches!(
            parse_frame(&raw, now, STALENESS),
            Err(ProtocolError::Stale { age_secs: 360 })
        ));
    }

    #[test]
    fn test_local_message_round_trips() {
        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("liquidity".into(), json!(25_000.0));
        let message = Message::new("market_data", now, fields);
        let parsed = parse_frame(&message.raw, now, STALENESS).unwrap();
        assert_eq!(parsed.kind, "market_data");
        assert_eq!(parsed.field_f64("liquidity"), Some(25_000.0));
    }
}
