//! HTTP surface tests against the router

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use event_ingest::api::{create_router, AppState};
use event_ingest::TrackerConfig;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app(config: &TrackerConfig) -> (Router, common::Harness) {
    let h = common::harness(config);
    let state = Arc::new(AppState::with_clock(
        h.tracker.clone(),
        &config.server,
        h.clock.clone(),
    ));
    (create_router(state), h)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_from(app, method, uri, body, "203.0.113.10").await
}

async fn send_from(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    ip: &str,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_track_event() {
    let (app, h) = app(&TrackerConfig::default());

    let (status, body) = send(
        &app,
        Method::POST,
        "/events",
        Some(json!({
            "type": "page_view",
            "anonymousId": "anon-1",
            "properties": { "path": "/home" }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["event"]["type"], "page_view");
    assert!(body["event"]["id"].as_str().is_some());
    assert_eq!(h.tracker.queue().len(), 1);
}

#[tokio::test]
async fn test_track_event_validation() {
    let (app, h) = app(&TrackerConfig::default());

    let (status, body) = send(
        &app,
        Method::POST,
        "/events",
        Some(json!({ "type": "click", "userId": "bad id!" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(&app, Method::POST, "/events", Some(json!({ "type": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::POST, "/events", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.tracker.queue().is_empty());
}

#[tokio::test]
async fn test_batch_limits() {
    let (app, _) = app(&TrackerConfig::default());

    let events: Vec<Value> = (0..3)
        .map(|n| json!({ "type": format!("step_{n}"), "anonymousId": "anon-1" }))
        .collect();
    let (status, body) = send(
        &app,
        Method::POST,
        "/events/batch",
        Some(json!({ "events": events })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(body["events"].as_array().unwrap().len(), 3);

    let too_many: Vec<Value> = (0..1001).map(|_| json!({ "type": "click" })).collect();
    let (status, _) = send(
        &app,
        Method::POST,
        "/events/batch",
        Some(json!({ "events": too_many })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        "/events/batch",
        Some(json!({ "events": [{ "type": "ok" }, { "type": "bad", "sessionId": "x y" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("events[1]"));
}

#[tokio::test]
async fn test_batch_partial_and_total_capacity_failure() {
    let mut config = TrackerConfig::default();
    config.queue.batch_size = 1_000;
    config.queue.max_queue_size = 2;
    let (app, h) = app(&config);

    let events: Vec<Value> = (0..3)
        .map(|n| json!({ "type": format!("step_{n}"), "anonymousId": "anon-1" }))
        .collect();
    let (status, body) = send(
        &app,
        Method::POST,
        "/events/batch",
        Some(json!({ "events": events })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["failed"][0]["index"], 2);
    assert_eq!(h.tracker.queue().len(), 2);

    let (status, body) = send(
        &app,
        Method::POST,
        "/events/batch",
        Some(json!({ "events": [{ "type": "click", "anonymousId": "anon-1" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "capacity_exceeded");
}

#[tokio::test]
async fn test_query_events_and_stats() {
    let (app, h) = app(&TrackerConfig::default());
    for kind in ["page_view", "page_view", "click"] {
        send(
            &app,
            Method::POST,
            "/events",
            Some(json!({ "type": kind, "userId": "user-1" })),
        )
        .await;
    }
    h.tracker.flush().await;

    let (status, body) = send(&app, Method::GET, "/events?eventType=page_view&limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, _) = send(&app, Method::GET, "/events?limit=10001", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalEvents"], 3);
    assert_eq!(body["stats"]["eventsByType"]["page_view"], 2);
    assert_eq!(body["stats"]["uniqueUsers"], 1);
}

#[tokio::test]
async fn test_identify_and_consent() {
    let mut config = TrackerConfig::default();
    config.privacy.privacy_mode = true;
    let (app, h) = app(&config);

    let (status, body) = send(
        &app,
        Method::POST,
        "/identify",
        Some(json!({ "userId": "user-1", "anonymousId": "anon-1", "traits": { "plan": "pro" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], "user-1");
    assert_eq!(body["user"]["traits"]["plan"], "pro");

    // No consent yet: accepted but not queued
    let (status, _) = send(
        &app,
        Method::POST,
        "/events",
        Some(json!({ "type": "click", "anonymousId": "anon-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.tracker.queue().is_empty());

    let (status, body) = send(
        &app,
        Method::POST,
        "/consent",
        Some(json!({ "anonymousId": "anon-1", "consent": { "analytics": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    send(
        &app,
        Method::POST,
        "/events",
        Some(json!({ "type": "click", "anonymousId": "anon-1" })),
    )
    .await;
    assert_eq!(h.tracker.queue().len(), 1);
}

#[tokio::test]
async fn test_end_session() {
    let (app, h) = app(&TrackerConfig::default());
    send(
        &app,
        Method::POST,
        "/events",
        Some(json!({ "type": "page_view", "anonymousId": "anon-1" })),
    )
    .await;
    h.tracker.flush().await;

    let (_, body) = send(&app, Method::GET, "/events", None).await;
    let session_id = body["events"][0]["sessionId"].as_str().unwrap().to_string();

    let (_, health) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(health["activeSessions"], 1);

    let (status, body) = send(&app, Method::DELETE, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["id"], session_id.as_str());
    assert!(body["session"]["endTime"].as_i64().is_some());

    let (_, health) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(health["activeSessions"], 0);

    let (status, _) = send(&app, Method::DELETE, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_pipeline_state() {
    let (app, h) = app(&TrackerConfig::default());
    h.tracker.init().await.unwrap();

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["initialized"], true);
    assert_eq!(body["queueSize"], 0);
    assert_eq!(body["failedCount"], 0);
    assert_eq!(body["storage"], "memory");

    h.tracker.shutdown().await;
}

#[tokio::test]
async fn test_blocked_ip() {
    let mut config = TrackerConfig::default();
    config.server.blocked_ips = vec!["198.51.100.1".to_string()];
    let (app, _) = app(&config);

    let (status, body) = send_from(&app, Method::GET, "/health", None, "198.51.100.1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = send_from(&app, Method::GET, "/health", None, "198.51.100.2").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit() {
    let mut config = TrackerConfig::default();
    config.server.rate_limit = 2;
    let (app, h) = app(&config);

    for _ in 0..2 {
        let (status, _) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");

    // Other clients have their own window
    let (status, _) = send_from(&app, Method::GET, "/health", None, "192.0.2.1").await;
    assert_eq!(status, StatusCode::OK);

    h.clock.advance(config.server.rate_limit_window);
    let (status, _) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stream_unavailable_when_realtime_disabled() {
    let mut config = TrackerConfig::default();
    config.realtime.enabled = false;
    let (app, _) = app(&config);

    let (status, body) = send(&app, Method::GET, "/stream", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "unavailable");
}
