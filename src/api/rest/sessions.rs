//! Session endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::ApiResponse;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::types::Session;
use crate::validation::validate_identifier;

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub session: Session,
}

/// DELETE /sessions/:id - End a live session
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<SessionBody>>, ApiError> {
    validate_identifier("sessionId", &id)?;
    let session = state
        .tracker
        .end_session(&id)
        .ok_or_else(|| ApiError::NotFound(format!("no active session '{id}'")))?;
    Ok(Json(ApiResponse::ok(SessionBody { session })))
}
