//! Messages exchanged with WebSocket clients besides stream messages

use serde::{Deserialize, Serialize};

/// Messages a client may send
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat
    Ping,
}

/// Reply to a client ping
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PongMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub timestamp: i64,
}

impl PongMessage {
    pub fn new(timestamp: i64) -> Self {
        Self {
            msg_type: "pong".to_string(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_pong_serialization() {
        let json = serde_json::to_string(&PongMessage::new(5)).unwrap();
        assert_eq!(json, r#"{"type":"pong","timestamp":5}"#);
    }
}
