//! Storage adapters
//!
//! The pipeline only talks to storage through the `StorageAdapter` trait.
//! Each backend lives in its own module and keeps its format details local.
//!
//! ```text
//!   BatchQueue ──save_events──►┐
//!                              ├──► dyn StorageAdapter ──► MemoryStorage
//!   SessionRegistry ──side────►┘                       └──► JsonlStorage
//!   writes (sessions/users)
//! ```
//!
//! Every method may fail with a `StorageError`. Callers treat event batch
//! failures as retryable and session/user failures as log-and-continue.

mod jsonl;
mod memory;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageResult;
use crate::types::{Event, EventFilter, EventStats, Session, SessionUpdate, User, UserKey};

pub use jsonl::JsonlStorage;
pub use memory::MemoryStorage;

/// Durable persistence of events, sessions and users
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    async fn connect(&self) -> StorageResult<()>;

    async fn disconnect(&self) -> StorageResult<()>;

    async fn save_event(&self, event: &Event) -> StorageResult<()> {
        self.save_events(std::slice::from_ref(event)).await
    }

    /// Write a batch of events; all or nothing where the backend allows it
    async fn save_events(&self, events: &[Event]) -> StorageResult<()>;

    /// Events matching `filter`, newest first
    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<Event>>;

    async fn save_session(&self, session: &Session) -> StorageResult<()>;

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;

    /// Apply a partial update; fails with `NotFound` for unknown sessions
    async fn update_session(&self, id: &str, update: &SessionUpdate) -> StorageResult<()>;

    /// Insert or replace the user keyed by its anonymous ID
    async fn save_user(&self, user: &User) -> StorageResult<()>;

    async fn get_user(&self, key: &UserKey) -> StorageResult<Option<User>>;

    /// Delete events older than `cutoff` (epoch ms); returns how many went
    async fn delete_old_events(&self, cutoff: i64) -> StorageResult<u64>;

    async fn get_event_stats(&self, filter: &EventFilter) -> StorageResult<EventStats>;
}

/// Build the adapter selected by configuration
pub fn from_config(config: &StorageConfig) -> Arc<dyn StorageAdapter> {
    match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Jsonl => Arc::new(JsonlStorage::new(&config.data_dir)),
    }
}
