//! Storage double for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MemoryStorage, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use crate::types::{Event, EventFilter, EventStats, Session, SessionUpdate, User, UserKey};

/// Memory storage whose event writes can be switched to fail
#[derive(Default)]
pub struct FlakyStorage {
    pub memory: MemoryStorage,
    failing: AtomicBool,
    batch_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let storage = Self::default();
        storage.set_failing(true);
        storage
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `save_events` calls, failed ones included
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Sizes of the batches that were written successfully
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

#[async_trait]
impl StorageAdapter for FlakyStorage {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.memory.connect().await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.memory.disconnect().await
    }

    async fn save_events(&self, events: &[Event]) -> StorageResult<()> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected failure".to_string()));
        }
        self.batch_sizes.lock().push(events.len());
        self.memory.save_events(events).await
    }

    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<Event>> {
        self.memory.get_events(filter).await
    }

    async fn save_session(&self, session: &Session) -> StorageResult<()> {
        self.memory.save_session(session).await
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        self.memory.get_session(id).await
    }

    async fn update_session(&self, id: &str, update: &SessionUpdate) -> StorageResult<()> {
        self.memory.update_session(id, update).await
    }

    async fn save_user(&self, user: &User) -> StorageResult<()> {
        self.memory.save_user(user).await
    }

    async fn get_user(&self, key: &UserKey) -> StorageResult<Option<User>> {
        self.memory.get_user(key).await
    }

    async fn delete_old_events(&self, cutoff: i64) -> StorageResult<u64> {
        self.memory.delete_old_events(cutoff).await
    }

    async fn get_event_stats(&self, filter: &EventFilter) -> StorageResult<EventStats> {
        self.memory.get_event_stats(filter).await
    }
}
