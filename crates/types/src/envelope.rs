// crates/types/src/envelope.rs
//! The live-stream message envelope: `{type, data, timestamp}`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message type tags used on the stream.
pub mod kinds {
    /// Server keepalive probe. Answered, never dispatched.
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    /// Welcome message sent right after the handshake.
    pub const CONNECTED: &str = "connected";
    pub const PREDICTION: &str = "prediction";
    pub const FL_PROGRESS: &str = "fl_progress";
    pub const FL_ROUND: &str = "fl_round";
    pub const FL_STATUS: &str = "fl_status";
    pub const TRAINING_START: &str = "training_start";
    pub const TRAINING_COMPLETE: &str = "training_complete";
    pub const TRAINING_STATUS: &str = "training_status";
    pub const DEVICE_STATUS: &str = "device_status";
    pub const SIMULATION_STATUS: &str = "simulation_status";
}

/// A payload that could not be decoded. Logged and dropped by consumers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MalformedMessage {
    #[error("invalid envelope: {0}")]
    Envelope(String),

    #[error("invalid `{kind}` payload: {reason}")]
    Payload { kind: String, reason: String },
}

/// One decoded stream message. Exists only for the duration of dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, deserialize_with = "crate::timestamp::lenient")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LiveMessage {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: None,
        }
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, MalformedMessage> {
        let msg: Self =
            serde_json::from_str(text).map_err(|e| MalformedMessage::Envelope(e.to_string()))?;
        if msg.kind.is_empty() {
            return Err(MalformedMessage::Envelope("empty `type`".into()));
        }
        Ok(msg)
    }

    pub fn is_ping(&self) -> bool {
        self.kind == kinds::PING
    }

    /// Decode `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, MalformedMessage> {
        T::deserialize(&self.data).map_err(|e| MalformedMessage::Payload {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }

    /// The keepalive acknowledgement frame.
    pub fn pong_frame() -> String {
        serde_json::json!({ "type": kinds::PONG }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_envelope() {
        let msg = LiveMessage::decode(
            r#"{"type":"prediction","data":{"score":0.9},"timestamp":"2025-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, "prediction");
        assert_eq!(msg.data["score"], 0.9);
        assert!(msg.timestamp.is_some());
    }

    #[test]
    fn test_decode_ping_without_data() {
        let msg = LiveMessage::decode(r#"{"type":"ping"}"#).unwrap();
        assert!(msg.is_ping());
        assert!(msg.data.is_null());
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        assert!(matches!(
            LiveMessage::decode("not json"),
            Err(MalformedMessage::Envelope(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_or_empty_type() {
        assert!(LiveMessage::decode(r#"{"data":{}}"#).is_err());
        assert!(LiveMessage::decode(r#"{"type":""}"#).is_err());
    }

    #[test]
    fn test_pong_frame_shape() {
        let v: serde_json::Value = serde_json::from_str(&LiveMessage::pong_frame()).unwrap();
        assert_eq!(v, serde_json::json!({"type": "pong"}));
    }
}
