//! Batch types. A batch is immutable once dispatched.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::compression::{CompressedPayload, DecompressError};
use crate::net::Message;

/// One message slot in a batch.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Plain(Message),
    /// The frame bytes were replaced by their compressed form. Parsed
    /// fields stay readable without decompressing.
    Compressed {
        kind: String,
        timestamp: DateTime<Utc>,
        fields: Map<String, Value>,
        payload: CompressedPayload,
    },
}

impl BatchEntry {
    pub fn kind(&self) -> &str {
        match self {
            Self::Plain(message) => &message.kind,
            Self::Compressed { kind, .. } => kind,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Plain(message) => message.timestamp,
            Self::Compressed { timestamp, .. } => *timestamp,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        match self {
            Self::Plain(message) => &message.fields,
            Self::Compressed { fields, .. } => fields,
        }
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields().get(name).and_then(Value::as_f64)
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed { .. })
    }

    /// Bytes carried downstream.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Plain(message) => message.size(),
            Self::Compressed { payload, .. } => payload.frame.len(),
        }
    }

    /// The original frame bytes.
    pub fn raw_bytes(&self) -> Result<Vec<u8>, DecompressError> {
        match self {
            Self::Plain(message) => Ok(message.raw.clone()),
            Self::Compressed { payload, .. } => payload.decompress(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub channel: String,
    /// Per-channel sequence number, starting at 1.
    pub sequence: u64,
    /// Entries in arrival order.
    pub entries: Vec<BatchEntry>,
    /// When the first message of the batch was popped.
    pub started_at: Instant,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compressed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_compressed()).count()
    }
}
