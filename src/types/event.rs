//! Tracked event types
//!
//! An `Event` is an immutable record of a single user interaction. Once the
//! ingestion pipeline admits it, nothing mutates it again: the queue, the
//! storage adapters and the realtime broadcaster all work on clones.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered key/value payload attached to an event
pub type Properties = Map<String, Value>;

/// A single recorded occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event ID (UUID v4)
    pub id: String,

    /// Event name, e.g. `page_view` or `signup_clicked`
    #[serde(rename = "type")]
    pub event_type: String,

    /// Epoch milliseconds when the event was recorded
    pub timestamp: i64,

    /// Session the event belongs to
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,

    #[serde(default)]
    pub properties: Properties,

    #[serde(default)]
    pub context: EventContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Event {
    /// Names of the required fields that are missing or empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id");
        }
        if self.event_type.trim().is_empty() {
            missing.push("type");
        }
        if self.timestamp <= 0 {
            missing.push("timestamp");
        }
        if self.session_id.trim().is_empty() {
            missing.push("sessionId");
        }
        missing
    }

    /// Brief view returned to HTTP callers
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            id: self.id.clone(),
            event_type: self.event_type.clone(),
            timestamp: self.timestamp,
        }
    }

    /// The identity key the event is attributed to (user ID first)
    pub fn identity(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.anonymous_id.as_deref())
    }

    /// Serialize to a JSON line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Brief event info echoed back after a track call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
}

/// Structured metadata describing where an event came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenInfo>,

    /// Any further client-supplied keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Collection library that produced the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: String,
    pub version: String,
}

/// Page the event was recorded on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> Event {
        let mut properties = Properties::new();
        properties.insert("zeta".to_string(), json!(1));
        properties.insert("alpha".to_string(), json!("two"));

        Event {
            id: "evt-1".to_string(),
            event_type: "page_view".to_string(),
            timestamp: 1_700_000_000_000,
            session_id: "sess-1".to_string(),
            user_id: None,
            anonymous_id: Some("anon-1".to_string()),
            properties,
            context: EventContext::default(),
            metadata: None,
        }
    }

    #[test]
    fn test_event_wire_field_names() {
        let json = sample_event().to_json_line().unwrap();
        assert!(json.contains("\"type\":\"page_view\""));
        assert!(json.contains("\"sessionId\":\"sess-1\""));
        assert!(json.contains("\"anonymousId\":\"anon-1\""));
        assert!(!json.contains("userId"));
    }

    #[test]
    fn test_properties_keep_insertion_order() {
        let json = sample_event().to_json_line().unwrap();
        let zeta = json.find("zeta").unwrap();
        let alpha = json.find("alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_missing_fields() {
        let mut event = sample_event();
        assert!(event.missing_fields().is_empty());

        event.event_type = "  ".to_string();
        event.session_id.clear();
        assert_eq!(event.missing_fields(), vec!["type", "sessionId"]);
    }

    #[test]
    fn test_context_keeps_unknown_keys() {
        let context: EventContext = serde_json::from_value(json!({
            "userAgent": "Mozilla/5.0",
            "page": {"path": "/pricing"},
            "campaign": {"source": "newsletter"}
        }))
        .unwrap();

        assert_eq!(context.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(context.page.unwrap().path.as_deref(), Some("/pricing"));
        assert_eq!(context.extra["campaign"]["source"], "newsletter");
    }

    #[test]
    fn test_identity_prefers_user_id() {
        let mut event = sample_event();
        assert_eq!(event.identity(), Some("anon-1"));
        event.user_id = Some("user-9".to_string());
        assert_eq!(event.identity(), Some("user-9"));
    }
}
