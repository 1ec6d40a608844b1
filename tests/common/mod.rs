//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use event_ingest::realtime::{StreamMessage, Subscriber};
use event_ingest::storage::MemoryStorage;
use event_ingest::utils::ManualClock;
use event_ingest::{Tracker, TrackerConfig};
use parking_lot::Mutex;

pub const START_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub tracker: Arc<Tracker>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(config: &TrackerConfig) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(START_MS));
    let tracker = Arc::new(Tracker::with_clock(config, storage.clone(), clock.clone()));
    Harness {
        tracker,
        storage,
        clock,
    }
}

/// Callback subscriber that records every message it receives
pub fn recording_subscriber() -> (Subscriber, Arc<Mutex<Vec<StreamMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscriber = Subscriber::callback(move |msg| {
        sink.lock().push(msg.clone());
        Ok(())
    });
    (subscriber, seen)
}
