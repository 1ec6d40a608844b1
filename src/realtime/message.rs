//! Stream message envelope

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of payload carried by a stream message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Event,
    Stats,
    Session,
    Connection,
    Error,
}

/// Message pushed to subscribers; built per broadcast and never stored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub data: Value,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl StreamMessage {
    pub fn new(kind: StreamKind, data: Value, timestamp: i64) -> Self {
        Self {
            kind,
            data,
            timestamp,
        }
    }

    /// Confirmation sent to a subscriber as soon as it is registered
    pub fn connected(timestamp: i64) -> Self {
        Self::new(
            StreamKind::Connection,
            json!({ "status": "connected", "timestamp": timestamp }),
            timestamp,
        )
    }

    pub fn error(message: &str, timestamp: i64) -> Self {
        Self::new(StreamKind::Error, json!({ "message": message }), timestamp)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
