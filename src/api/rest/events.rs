//! Event ingestion and query endpoints

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::api::error::ApiError;
use crate::api::rate_limit::ClientIp;
use crate::api::state::AppState;
use crate::error::{TrackerError, TrackerResult};
use crate::tracker::{BatchOutcome, TrackRequest};
use crate::types::{Event, EventFilter, EventSummary};
use crate::validation::{
    validate_batch_len, validate_event_type, validate_limit, validate_optional_identifier,
};

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct TrackedEvent {
    pub event: EventSummary,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub events: Vec<TrackRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TrackedBatch {
    pub count: usize,
    pub events: Vec<EventSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventsQuery {
    fn into_filter(self) -> TrackerResult<EventFilter> {
        validate_limit(self.limit)?;
        validate_optional_identifier("userId", self.user_id.as_deref())?;
        validate_optional_identifier("sessionId", self.session_id.as_deref())?;
        Ok(EventFilter {
            start_time: self.start_time,
            end_time: self.end_time,
            event_type: self.event_type,
            user_id: self.user_id,
            session_id: self.session_id,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIMIT)),
            offset: self.offset,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct EventList {
    pub count: usize,
    pub events: Vec<Event>,
}

fn validate_request(request: &TrackRequest) -> TrackerResult<()> {
    validate_event_type(&request.event_type)?;
    validate_optional_identifier("sessionId", request.session_id.as_deref())?;
    validate_optional_identifier("userId", request.user_id.as_deref())?;
    validate_optional_identifier("anonymousId", request.anonymous_id.as_deref())?;
    Ok(())
}

/// Record the caller's address unless the client already supplied one
fn stamp_ip(request: &mut TrackRequest, ip: &ClientIp) {
    let context = request.context.get_or_insert_with(Default::default);
    if context.ip.is_none() {
        context.ip = Some(ip.0.clone());
    }
}

/// POST /events - Track a single event
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    Extension(ip): Extension<ClientIp>,
    payload: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TrackedEvent>>, ApiError> {
    let Json(mut request) = payload?;
    validate_request(&request)?;
    stamp_ip(&mut request, &ip);

    let outcome = state.tracker.track(request).await?;
    Ok(Json(ApiResponse::ok(TrackedEvent {
        event: outcome.event.summary(),
    })))
}

/// POST /events/batch - Track up to 1000 events; items succeed or fail individually
pub async fn track_batch(
    State(state): State<Arc<AppState>>,
    Extension(ip): Extension<ClientIp>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<TrackedBatch>>, ApiError> {
    let Json(BatchRequest { mut events }) = payload?;
    validate_batch_len(events.len())?;
    for (index, request) in events.iter_mut().enumerate() {
        validate_request(request).map_err(|e| match e {
            TrackerError::Validation(msg) => {
                TrackerError::Validation(format!("events[{index}]: {msg}"))
            }
            other => other,
        })?;
        stamp_ip(request, &ip);
    }

    let BatchOutcome {
        admitted,
        skipped,
        mut failed,
    } = state.tracker.track_batch(events).await;
    if admitted.is_empty() && skipped.is_empty() && !failed.is_empty() {
        let (_, err) = failed.swap_remove(0);
        return Err(err.into());
    }

    let summaries: Vec<EventSummary> = admitted
        .iter()
        .chain(skipped.iter())
        .map(Event::summary)
        .collect();
    let failed = failed
        .into_iter()
        .map(|(index, err)| BatchFailure {
            index,
            message: err.to_string(),
        })
        .collect();

    Ok(Json(ApiResponse::ok(TrackedBatch {
        count: summaries.len(),
        events: summaries,
        failed,
    })))
}

/// GET /events - Stored events, newest first
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<EventList>>, ApiError> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    let events = state.tracker.query_events(&filter).await?;
    Ok(Json(ApiResponse::ok(EventList {
        count: events.len(),
        events,
    })))
}
