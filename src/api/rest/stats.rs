//! Aggregate stats endpoint

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::types::{EventFilter, EventStats};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub event_type: Option<String>,
}

impl From<StatsQuery> for EventFilter {
    fn from(query: StatsQuery) -> Self {
        EventFilter {
            start_time: query.start_time,
            end_time: query.end_time,
            event_type: query.event_type,
            ..EventFilter::default()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsBody {
    pub stats: EventStats,
}

/// GET /stats - Counts over stored events
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<StatsBody>>, ApiError> {
    let Query(query) = query?;
    let stats = state.tracker.stats(&query.into()).await?;
    Ok(Json(ApiResponse::ok(StatsBody { stats })))
}
