//! Read-side filter and aggregate types

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::Event;

/// Filter accepted by event queries and stat aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Inclusive lower bound, epoch ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// Inclusive upper bound, epoch ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl EventFilter {
    /// Check the non-paging criteria against one event
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        if let Some(ref event_type) = self.event_type {
            if event.event_type != *event_type {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if event.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(ref session_id) = self.session_id {
            if event.session_id != *session_id {
                return false;
            }
        }
        true
    }

    /// Filter, sort newest first, then apply offset/limit
    pub fn apply<'a, I>(&self, events: I) -> Vec<Event>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut matched: Vec<Event> = events
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().skip(offset).take(limit).collect()
    }
}

/// First and last event timestamps covered by a stats result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Aggregate counts over a filtered set of events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub unique_users: u64,
    pub unique_sessions: u64,
    pub time_range: TimeRange,
}

impl EventStats {
    /// Aggregate the events that match `filter` (paging is ignored)
    pub fn collect<'a, I>(events: I, filter: &EventFilter) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut stats = EventStats::default();
        let mut users: HashSet<&str> = HashSet::new();
        let mut sessions: HashSet<&str> = HashSet::new();

        for event in events.into_iter().filter(|e| filter.matches(e)) {
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type.clone())
                .or_insert(0) += 1;

            if let Some(identity) = event.identity() {
                users.insert(identity);
            }
            sessions.insert(event.session_id.as_str());

            let range = &mut stats.time_range;
            range.start = Some(range.start.map_or(event.timestamp, |s| s.min(event.timestamp)));
            range.end = Some(range.end.map_or(event.timestamp, |e| e.max(event.timestamp)));
        }

        stats.unique_users = users.len() as u64;
        stats.unique_sessions = sessions.len() as u64;
        stats
    }
}
