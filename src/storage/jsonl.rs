//! Flat-file storage adapter
//!
//! Layout under the data directory:
//!
//! ```text
//! data/
//! ├── events.jsonl     append-only, one event per line, fsync per batch
//! ├── sessions.jsonl   snapshot, rewritten atomically on every change
//! └── users.jsonl      snapshot, rewritten atomically on every change
//! ```
//!
//! Sessions and users are small and kept in memory once connected; events are
//! read back from the log on every query. All file work runs on the blocking
//! pool.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StorageAdapter;
use crate::error::{StorageError, StorageResult};
use crate::types::{Event, EventFilter, EventStats, Session, SessionUpdate, User, UserKey};
use crate::utils::atomic::{atomic_write_with, cleanup_temp_files};

pub struct JsonlStorage {
    inner: Arc<Inner>,
}

struct Inner {
    data_dir: PathBuf,
    /// `None` until connected
    state: Mutex<Option<Records>>,
    /// Serializes appends against log rewrites
    events_lock: Mutex<()>,
}

#[derive(Default)]
struct Records {
    sessions: HashMap<String, Session>,
    /// Keyed by anonymous ID
    users: HashMap<String, User>,
}

impl JsonlStorage {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                data_dir: data_dir.as_ref().to_path_buf(),
                state: Mutex::new(None),
                events_lock: Mutex::new(()),
            }),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    pub fn events_path(&self) -> PathBuf {
        self.inner.events_path()
    }

    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Inner) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| StorageError::Backend(format!("blocking task failed: {}", e)))?
    }
}

impl Inner {
    fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.jsonl")
    }

    fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.jsonl")
    }

    fn connect(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.data_dir)?;

        let cleaned = cleanup_temp_files(&self.data_dir)?;
        if cleaned > 0 {
            tracing::warn!(count = cleaned, "removed leftover temp files");
        }

        let sessions: Vec<Session> = read_lines(&self.sessions_path())?;
        let users: Vec<User> = read_lines(&self.users_path())?;

        let records = Records {
            sessions: sessions.into_iter().map(|s| (s.id.clone(), s)).collect(),
            users: users
                .into_iter()
                .map(|u| (u.anonymous_id.clone(), u))
                .collect(),
        };

        tracing::info!(
            data_dir = %self.data_dir.display(),
            sessions = records.sessions.len(),
            users = records.users.len(),
            "jsonl storage connected"
        );

        *self.state.lock() = Some(records);
        Ok(())
    }

    fn ensure_connected(&self) -> StorageResult<()> {
        if self.state.lock().is_some() {
            Ok(())
        } else {
            Err(StorageError::NotConnected)
        }
    }

    fn append_events(&self, events: &[Event]) -> StorageResult<()> {
        self.ensure_connected()?;

        // One buffer, one write, one fsync per batch
        let mut buf = String::new();
        for event in events {
            buf.push_str(&event.to_json_line()?);
            buf.push('\n');
        }

        let _guard = self.events_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;
        file.write_all(buf.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn load_events(&self) -> StorageResult<Vec<Event>> {
        self.ensure_connected()?;
        let _guard = self.events_lock.lock();
        read_lines(&self.events_path())
    }

    fn delete_old_events(&self, cutoff: i64) -> StorageResult<u64> {
        self.ensure_connected()?;
        let _guard = self.events_lock.lock();

        let events: Vec<Event> = read_lines(&self.events_path())?;
        let before = events.len();
        let kept: Vec<&Event> = events.iter().filter(|e| e.timestamp >= cutoff).collect();
        let removed = (before - kept.len()) as u64;

        if removed > 0 {
            write_lines(&self.events_path(), kept)?;
        }
        Ok(removed)
    }

    /// Run `f` on the in-memory records, then persist them with `persist`
    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut Records) -> StorageResult<T>,
        persist: impl FnOnce(&Self, &Records) -> StorageResult<()>,
    ) -> StorageResult<T> {
        let mut state = self.state.lock();
        let records = state.as_mut().ok_or(StorageError::NotConnected)?;
        let result = f(records)?;
        persist(self, records)?;
        Ok(result)
    }

    fn write_sessions(&self, records: &Records) -> StorageResult<()> {
        write_lines(&self.sessions_path(), records.sessions.values())
    }

    fn write_users(&self, records: &Records) -> StorageResult<()> {
        write_lines(&self.users_path(), records.users.values())
    }
}

/// Read one JSON value per line, skipping blank and malformed lines
fn read_lines<T: DeserializeOwned>(path: &Path) -> StorageResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %e,
                    "skipping unreadable record"
                );
            }
        }
    }

    Ok(items)
}

fn write_lines<'a, T, I>(path: &Path, items: I) -> StorageResult<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buf = String::new();
    for item in items {
        buf.push_str(&serde_json::to_string(item)?);
        buf.push('\n');
    }
    atomic_write_with(path, |file| file.write_all(buf.as_bytes()))?;
    Ok(())
}

#[async_trait]
impl StorageAdapter for JsonlStorage {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn connect(&self) -> StorageResult<()> {
        self.blocking(|inner| inner.connect()).await
    }

    async fn disconnect(&self) -> StorageResult<()> {
        *self.inner.state.lock() = None;
        tracing::info!("jsonl storage disconnected");
        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let events = events.to_vec();
        self.blocking(move |inner| inner.append_events(&events)).await
    }

    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<Event>> {
        let filter = filter.clone();
        self.blocking(move |inner| {
            let events = inner.load_events()?;
            Ok(filter.apply(&events))
        })
        .await
    }

    async fn save_session(&self, session: &Session) -> StorageResult<()> {
        let session = session.clone();
        self.blocking(move |inner| {
            inner.with_records(
                |records| {
                    records.sessions.insert(session.id.clone(), session);
                    Ok(())
                },
                Inner::write_sessions,
            )
        })
        .await
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let state = self.inner.state.lock();
        let records = state.as_ref().ok_or(StorageError::NotConnected)?;
        Ok(records.sessions.get(id).cloned())
    }

    async fn update_session(&self, id: &str, update: &SessionUpdate) -> StorageResult<()> {
        let id = id.to_string();
        let update = update.clone();
        self.blocking(move |inner| {
            inner.with_records(
                |records| {
                    let session = records.sessions.get_mut(&id).ok_or_else(|| {
                        StorageError::NotFound {
                            kind: "session",
                            id: id.clone(),
                        }
                    })?;
                    update.apply_to(session);
                    Ok(())
                },
                Inner::write_sessions,
            )
        })
        .await
    }

    async fn save_user(&self, user: &User) -> StorageResult<()> {
        let user = user.clone();
        self.blocking(move |inner| {
            inner.with_records(
                |records| {
                    records.users.insert(user.anonymous_id.clone(), user);
                    Ok(())
                },
                Inner::write_users,
            )
        })
        .await
    }

    async fn get_user(&self, key: &UserKey) -> StorageResult<Option<User>> {
        let state = self.inner.state.lock();
        let records = state.as_ref().ok_or(StorageError::NotConnected)?;
        let found = match key {
            UserKey::AnonymousId(anon) => records.users.get(anon).cloned(),
            UserKey::Id(_) => records.users.values().find(|u| key.matches(u)).cloned(),
        };
        Ok(found)
    }

    async fn delete_old_events(&self, cutoff: i64) -> StorageResult<u64> {
        self.blocking(move |inner| inner.delete_old_events(cutoff))
            .await
    }

    async fn get_event_stats(&self, filter: &EventFilter) -> StorageResult<EventStats> {
        let filter = filter.clone();
        self.blocking(move |inner| {
            let events = inner.load_events()?;
            Ok(EventStats::collect(&events, &filter))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventContext, Properties};
    use tempfile::TempDir;

    fn event(id: &str, event_type: &str, ts: i64) -> Event {
        Event {
            id: id.to_string(),
            event_type: event_type.to_string(),
            timestamp: ts,
            session_id: "s1".to_string(),
            user_id: Some("u1".to_string()),
            anonymous_id: Some("a1".to_string()),
            properties: Properties::new(),
            context: EventContext::default(),
            metadata: None,
        }
    }

    async fn connected_store() -> (JsonlStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::new(dir.path());
        storage.connect().await.unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::new(dir.path());
        let err = storage.save_event(&event("1", "click", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotConnected));
    }

    #[tokio::test]
    async fn test_append_and_query_events() {
        let (storage, _dir) = connected_store().await;
        storage
            .save_events(&[event("1", "click", 100), event("2", "view", 200)])
            .await
            .unwrap();
        storage.save_event(&event("3", "click", 300)).await.unwrap();

        let clicks = storage
            .get_events(&EventFilter {
                event_type: Some("click".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = clicks.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);

        let stats = storage
            .get_event_stats(&EventFilter::default())
            .await
            .unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.unique_sessions, 1);
    }

    #[tokio::test]
    async fn test_skips_corrupt_lines() {
        let (storage, _dir) = connected_store().await;
        storage.save_event(&event("1", "click", 100)).await.unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(storage.events_path())
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        storage.save_event(&event("2", "click", 200)).await.unwrap();
        let events = storage.get_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_old_events_rewrites_log() {
        let (storage, _dir) = connected_store().await;
        storage
            .save_events(&[
                event("1", "click", 100),
                event("2", "click", 200),
                event("3", "click", 300),
            ])
            .await
            .unwrap();

        assert_eq!(storage.delete_old_events(200).await.unwrap(), 1);
        assert_eq!(storage.delete_old_events(200).await.unwrap(), 0);

        let content = fs::read_to_string(storage.events_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_sessions_and_users_survive_reconnect() {
        let dir = TempDir::new().unwrap();
        {
            let storage = JsonlStorage::new(dir.path());
            storage.connect().await.unwrap();

            let session = Session::new("s1".into(), None, "a1".into(), 10);
            storage.save_session(&session).await.unwrap();
            storage
                .update_session(
                    "s1",
                    &SessionUpdate {
                        event_count: Some(4),
                        end_time: Some(99),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();

            let mut user = User::new("a1".into(), 10);
            user.id = Some("u1".into());
            storage.save_user(&user).await.unwrap();
            storage.disconnect().await.unwrap();
        }

        let storage = JsonlStorage::new(dir.path());
        storage.connect().await.unwrap();

        let session = storage.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.event_count, 4);
        assert_eq!(session.end_time, Some(99));

        let user = storage
            .get_user(&UserKey::Id("u1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.anonymous_id, "a1");
    }
}
