//! End-to-end tests of the ingestion pipeline

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness, recording_subscriber};
use event_ingest::queue::BatchQueue;
use event_ingest::realtime::StreamKind;
use event_ingest::storage::{JsonlStorage, MemoryStorage, StorageAdapter};
use event_ingest::utils::SystemClock;
use event_ingest::{Consent, EventFilter, TrackRequest, Tracker, TrackerConfig};
use serde_json::json;
use tempfile::TempDir;

fn event(n: usize) -> event_ingest::Event {
    event_ingest::Event {
        id: format!("evt-{n}"),
        event_type: "click".to_string(),
        timestamp: common::START_MS + n as i64,
        session_id: "s1".to_string(),
        user_id: None,
        anonymous_id: Some("a1".to_string()),
        properties: Default::default(),
        context: Default::default(),
        metadata: None,
    }
}

#[tokio::test]
async fn test_size_triggered_flushes() {
    let mut config = TrackerConfig::default();
    config.queue.batch_size = 100;
    let storage = Arc::new(MemoryStorage::new());
    let queue = BatchQueue::new(config.queue.clone(), storage.clone(), Arc::new(SystemClock));

    for n in 0..250 {
        queue.enqueue(event(n)).unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.size_flush_pending() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(storage.event_count(), 200);
    assert_eq!(queue.len(), 50);
    assert_eq!(queue.stats().batches_written, 2);

    queue.flush().await;
    assert_eq!(storage.event_count(), 250);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_disabled_broadcaster_delivers_nothing() {
    let h = harness(&TrackerConfig::default());
    let broadcaster = h.tracker.broadcaster();
    let (a, seen_a) = recording_subscriber();
    let (b, seen_b) = recording_subscriber();
    broadcaster.subscribe(a).unwrap();
    broadcaster.subscribe(b).unwrap();
    seen_a.lock().clear();
    seen_b.lock().clear();

    broadcaster.disable();
    h.tracker
        .track(TrackRequest::new("click").anonymous("anon-1"))
        .await
        .unwrap();
    assert!(seen_a.lock().is_empty());
    assert!(seen_b.lock().is_empty());

    broadcaster.enable();
    h.tracker
        .track(TrackRequest::new("click").anonymous("anon-1"))
        .await
        .unwrap();
    for seen in [&seen_a, &seen_b] {
        let messages = seen.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, StreamKind::Event);
    }
}

#[tokio::test]
async fn test_session_lifecycle() {
    let mut config = TrackerConfig::default();
    config.session.timeout = Duration::from_secs(60);
    let h = harness(&config);

    let first = h
        .tracker
        .track(TrackRequest::new("page_view").anonymous("anon-1"))
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(50));
    let second = h
        .tracker
        .track(TrackRequest::new("page_view").anonymous("anon-1"))
        .await
        .unwrap();
    assert_eq!(first.event.session_id, second.event.session_id);

    // Idle past the timeout: the sweep ends it and the next event starts fresh
    h.clock.advance(Duration::from_secs(61));
    let ended = h.tracker.sessions().sweep_expired();
    assert_eq!(ended.len(), 1);
    assert!(ended[0].end_time.is_some());
    assert_eq!(ended[0].event_count, 2);

    let third = h
        .tracker
        .track(TrackRequest::new("page_view").anonymous("anon-1"))
        .await
        .unwrap();
    assert_ne!(third.event.session_id, first.event.session_id);
    assert!(third.session_created);

    h.tracker.sessions().flush_writes().await;
    let stored = h
        .storage
        .get_session(&first.event.session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.end_time.is_some());
}

#[tokio::test]
async fn test_identify_then_track_by_user() {
    let h = harness(&TrackerConfig::default());
    let anon = h
        .tracker
        .track(TrackRequest::new("page_view").anonymous("anon-1"))
        .await
        .unwrap();

    let traits = json!({ "plan": "pro" }).as_object().cloned();
    let first = h.tracker.identify("user-1", "anon-1", traits).await;
    let traits = json!({ "name": "Sam" }).as_object().cloned();
    let second = h.tracker.identify("user-1", "anon-1", traits).await;

    assert!(second.updated_at > first.updated_at);
    let traits = second.traits.unwrap();
    assert_eq!(traits["plan"], "pro");
    assert_eq!(traits["name"], "Sam");

    let by_user = h
        .tracker
        .track(TrackRequest::new("click").user("user-1"))
        .await
        .unwrap();
    assert_eq!(by_user.event.session_id, anon.event.session_id);
}

#[tokio::test]
async fn test_privacy_mode_gates_queue_and_stream() {
    let mut config = TrackerConfig::default();
    config.privacy.privacy_mode = true;
    let h = harness(&config);
    let (sub, seen) = recording_subscriber();
    h.tracker.broadcaster().subscribe(sub).unwrap();
    seen.lock().clear();

    let skipped = h
        .tracker
        .track(TrackRequest::new("click").anonymous("anon-1"))
        .await
        .unwrap();
    assert!(!skipped.admitted);
    assert_eq!(skipped.event.event_type, "click");
    assert!(h.tracker.queue().is_empty());
    assert!(seen.lock().is_empty());

    h.tracker
        .set_consent(
            "anon-1",
            Consent {
                analytics: true,
                marketing: Some(false),
                necessary: None,
            },
        )
        .await;
    let admitted = h
        .tracker
        .track(TrackRequest::new("click").anonymous("anon-1"))
        .await
        .unwrap();
    assert!(admitted.admitted);
    assert_eq!(h.tracker.queue().len(), 1);
    assert!(seen.lock().iter().any(|m| m.kind == StreamKind::Event));
}

#[tokio::test]
async fn test_jsonl_storage_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = TrackerConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();

    let tracker = Tracker::new(&config, Arc::new(JsonlStorage::new(dir.path())));
    tracker.init().await.unwrap();
    let outcome = tracker
        .track(
            TrackRequest::new("signup")
                .anonymous("anon-1")
                .property("plan", "pro"),
        )
        .await
        .unwrap();
    tracker
        .track(TrackRequest::new("page_view").anonymous("anon-1"))
        .await
        .unwrap();
    tracker.shutdown().await;

    let storage = JsonlStorage::new(dir.path());
    storage.connect().await.unwrap();
    let events = storage.get_events(&EventFilter::default()).await.unwrap();
    assert_eq!(events.len(), 2);

    let signup = events.iter().find(|e| e.event_type == "signup").unwrap();
    assert_eq!(signup.id, outcome.event.id);
    assert_eq!(signup.properties["plan"], "pro");

    let session = storage
        .get_session(&outcome.event.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.event_count, 2);
}
