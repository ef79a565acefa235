//! Wire codec
//!
//! One JSON object per WebSocket text frame:
//! `{"type": .., "data": .., "timestamp": .., "hash": ..}` where `hash` is the
//! first 16 hex chars of SHA-256 over the compact JSON of
//! `{"type", "data", "timestamp"}` in that order. Frames are only valid
//! while `|now - timestamp|` stays inside the freshness window.

use crate::error::CodecError;
use crate::message::Message;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;
pub const DEFAULT_MAX_MESSAGE_AGE_MS: u64 = 8_000;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A framed message, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub message: Message,
    pub timestamp: u64,
    pub hash: String,
}

impl WireMessage {
    /// Serialized frame text
    pub fn to_json(&self) -> Result<String, CodecError> {
        let mut object = message_object(&self.message)?;
        object.insert("timestamp".to_string(), Value::from(self.timestamp));
        object.insert("hash".to_string(), Value::String(self.hash.clone()));
        serde_json::to_string(&Value::Object(object))
            .map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[derive(Serialize)]
struct HashPreimage<'a> {
    #[serde(rename = "type")]
    kind: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    timestamp: u64,
}

fn message_object(message: &Message) -> Result<Map<String, Value>, CodecError> {
    match serde_json::to_value(message) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(CodecError::Malformed("message is not an object".to_string())),
        Err(e) => Err(CodecError::Malformed(e.to_string())),
    }
}

fn compute_hash(kind: &Value, data: Option<&Value>, timestamp: u64) -> Result<String, CodecError> {
    let preimage = serde_json::to_vec(&HashPreimage {
        kind,
        data,
        timestamp,
    })
    .map_err(|e| CodecError::Malformed(e.to_string()))?;
    let digest = Sha256::digest(&preimage);
    let mut hash = hex::encode(digest);
    hash.truncate(16);
    Ok(hash)
}

#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    pub max_message_size: usize,
    pub max_age_ms: u64,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_age_ms: DEFAULT_MAX_MESSAGE_AGE_MS,
        }
    }
}

impl WireCodec {
    pub fn new(max_message_size: usize, max_age_ms: u64) -> Self {
        Self {
            max_message_size,
            max_age_ms,
        }
    }

    pub fn frame(&self, message: Message) -> Result<WireMessage, CodecError> {
        self.frame_at(message, now_ms())
    }

    pub fn frame_at(&self, message: Message, timestamp: u64) -> Result<WireMessage, CodecError> {
        let object = message_object(&message)?;
        let kind = object
            .get("type")
            .ok_or_else(|| CodecError::Malformed("missing type".to_string()))?;
        let hash = compute_hash(kind, object.get("data"), timestamp)?;
        Ok(WireMessage {
            message,
            timestamp,
            hash,
        })
    }

    /// Frame and serialize in one step
    pub fn encode(&self, message: Message) -> Result<(WireMessage, String), CodecError> {
        let wire = self.frame(message)?;
        let text = wire.to_json()?;
        if text.len() > self.max_message_size {
            return Err(CodecError::TooLarge {
                size: text.len(),
                max: self.max_message_size,
            });
        }
        Ok((wire, text))
    }

    pub fn parse(&self, raw: &str) -> Result<WireMessage, CodecError> {
        self.parse_at(raw, now_ms())
    }

    pub fn parse_at(&self, raw: &str, now: u64) -> Result<WireMessage, CodecError> {
        if raw.len() > self.max_message_size {
            return Err(CodecError::TooLarge {
                size: raw.len(),
                max: self.max_message_size,
            });
        }

        let mut object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return Err(CodecError::Malformed("not an object".to_string())),
            Err(e) => return Err(CodecError::Malformed(e.to_string())),
        };

        let hash = match object.remove("hash") {
            Some(Value::String(hash)) => hash,
            _ => return Err(CodecError::Malformed("missing hash".to_string())),
        };
        let timestamp = object
            .remove("timestamp")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CodecError::Malformed("missing timestamp".to_string()))?;

        if now.abs_diff(timestamp) > self.max_age_ms {
            return Err(CodecError::Stale { timestamp, now });
        }

        let kind = object
            .get("type")
            .ok_or_else(|| CodecError::Malformed("missing type".to_string()))?;
        if compute_hash(kind, object.get("data"), timestamp)? != hash {
            return Err(CodecError::HashMismatch);
        }

        let message = serde_json::from_value::<Message>(Value::Object(object))
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        Ok(WireMessage {
            message,
            timestamp,
            hash,
        })
    }
}
