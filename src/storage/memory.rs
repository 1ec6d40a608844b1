//! In-memory storage adapter
//!
//! Nothing survives a restart. Useful for development and as the reference
//! behavior the other adapters are tested against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::StorageAdapter;
use crate::error::{StorageError, StorageResult};
use crate::types::{Event, EventFilter, EventStats, Session, SessionUpdate, User, UserKey};

#[derive(Default)]
pub struct MemoryStorage {
    connected: AtomicBool,
    events: RwLock<Vec<Event>>,
    sessions: RwLock<HashMap<String, Session>>,
    /// Keyed by anonymous ID
    users: RwLock<HashMap<String, User>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> StorageResult<()> {
        self.events.write().extend_from_slice(events);
        Ok(())
    }

    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<Event>> {
        Ok(filter.apply(self.events.read().iter()))
    }

    async fn save_session(&self, session: &Session) -> StorageResult<()> {
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn update_session(&self, id: &str, update: &SessionUpdate) -> StorageResult<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| StorageError::NotFound {
            kind: "session",
            id: id.to_string(),
        })?;
        update.apply_to(session);
        Ok(())
    }

    async fn save_user(&self, user: &User) -> StorageResult<()> {
        self.users
            .write()
            .insert(user.anonymous_id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, key: &UserKey) -> StorageResult<Option<User>> {
        let users = self.users.read();
        let found = match key {
            UserKey::AnonymousId(anon) => users.get(anon).cloned(),
            UserKey::Id(_) => users.values().find(|u| key.matches(u)).cloned(),
        };
        Ok(found)
    }

    async fn delete_old_events(&self, cutoff: i64) -> StorageResult<u64> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn get_event_stats(&self, filter: &EventFilter) -> StorageResult<EventStats> {
        Ok(EventStats::collect(self.events.read().iter(), filter))
    }
}
