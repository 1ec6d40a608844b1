//! Session records

use serde::{Deserialize, Serialize};

/// A bounded window of activity for one identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub anonymous_id: String,
    pub start_time: i64,
    pub last_activity_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub event_count: u64,
}

impl Session {
    /// Create a fresh session starting at `now`
    pub fn new(id: String, user_id: Option<String>, anonymous_id: String, now: i64) -> Self {
        Self {
            id,
            user_id,
            anonymous_id,
            start_time: now,
            last_activity_time: now,
            end_time: None,
            event_count: 0,
        }
    }

    /// Not ended and last active less than `timeout_ms` ago
    pub fn is_active(&self, now: i64, timeout_ms: i64) -> bool {
        self.end_time.is_none() && now - self.last_activity_time < timeout_ms
    }

    /// Record one more event at `now`
    pub fn record_activity(&mut self, now: i64) {
        self.last_activity_time = self.last_activity_time.max(now);
        self.event_count += 1;
    }

    pub fn end(&mut self, now: i64) {
        if self.end_time.is_none() {
            self.end_time = Some(now);
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time.unwrap_or(self.last_activity_time) - self.start_time
    }
}

/// Partial session update handed to storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_count: Option<u64>,
}

impl SessionUpdate {
    /// Snapshot of the mutable fields of `session`
    pub fn from_session(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            last_activity_time: Some(session.last_activity_time),
            end_time: session.end_time,
            event_count: Some(session.event_count),
        }
    }

    pub fn apply_to(&self, session: &mut Session) {
        if let Some(ref user_id) = self.user_id {
            session.user_id = Some(user_id.clone());
        }
        if let Some(ts) = self.last_activity_time {
            session.last_activity_time = ts;
        }
        if let Some(ts) = self.end_time {
            session.end_time = Some(ts);
        }
        if let Some(count) = self.event_count {
            session.event_count = count;
        }
    }
}
