//! HTTP server setup with Axum

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::rate_limit::ip_gate;
use super::rest::{events, identity, sessions, stats};
use super::sse::sse_handler;
use super::state::AppState;
use super::websocket::ws_handler;
use crate::tracker::Health;

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", post(events::track_event).get(events::list_events))
        .route("/events/batch", post(events::track_batch))
        .route("/stats", get(stats::get_stats))
        .route("/identify", post(identity::identify))
        .route("/consent", post(identity::set_consent))
        .route("/sessions/:id", delete(sessions::end_session))
        .route("/ws", get(ws_handler))
        .route("/stream", get(sse_handler))
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(state.clone(), ip_gate))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.cors_origins))
        .with_state(state)
}

/// Any origin when none are configured, otherwise only the listed ones
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(state.tracker.health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::storage::MemoryStorage;
    use crate::tracker::Tracker;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let config = TrackerConfig::default();
        let tracker = Arc::new(Tracker::new(&config, Arc::new(MemoryStorage::new())));
        let state = Arc::new(AppState::new(tracker, &config.server));
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[test]
    fn test_cors_layer_skips_invalid_origins() {
        // Builds without panicking on a bad header value
        let _ = cors_layer(&["https://example.com".to_string(), "bad\norigin".to_string()]);
    }
}
