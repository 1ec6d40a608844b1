//! Identify and consent endpoints

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ApiResponse;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::types::{Consent, User};
use crate::validation::validate_identifier;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    pub user_id: String,
    pub anonymous_id: String,
    #[serde(default)]
    pub traits: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub anonymous_id: String,
    pub consent: Consent,
}

#[derive(Debug, Serialize)]
pub struct UserBody {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

/// POST /identify - Attach a user ID and traits to an anonymous identity
pub async fn identify(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UserBody>>, ApiError> {
    let Json(request) = payload?;
    validate_identifier("userId", &request.user_id)?;
    validate_identifier("anonymousId", &request.anonymous_id)?;

    let user = state
        .tracker
        .identify(&request.user_id, &request.anonymous_id, request.traits)
        .await;
    Ok(Json(ApiResponse::ok(UserBody { user })))
}

/// POST /consent - Record consent flags for an anonymous identity
pub async fn set_consent(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConsentRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    let Json(request) = payload?;
    validate_identifier("anonymousId", &request.anonymous_id)?;

    state
        .tracker
        .set_consent(&request.anonymous_id, request.consent)
        .await;
    Ok(Json(ApiResponse::ok(Empty {})))
}
