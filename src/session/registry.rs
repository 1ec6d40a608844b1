//! In-memory session and user registry
//!
//! The registry is the only writer of session and user records, both in
//! memory and to storage. Storage writes are detached side writes: they are
//! queued to a single writer task that applies them in order, failures are
//! logged, and the in-memory view stays authoritative for this process.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::storage::StorageAdapter;
use crate::types::{Consent, Session, SessionUpdate, User, UserKey};
use crate::utils::{duration_millis, Clock, PeriodicTask};

/// Outcome of `SessionRegistry::resolve`
#[derive(Debug, Clone)]
pub struct Resolved {
    pub session: Session,
    /// True when no active session existed and this one was just created
    pub created: bool,
}

/// Owns every live session and cached user record.
///
/// Cheap to clone; clones share state. Must be created inside a tokio
/// runtime (it spawns its storage writer and expiry timers there).
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    timeout_ms: i64,
    retention_ms: i64,
    storage: Arc<dyn StorageAdapter>,
    clock: Arc<dyn Clock>,
    writes: mpsc::UnboundedSender<SideWrite>,
    state: Mutex<RegistryState>,
    session_sweep: PeriodicTask,
    user_sweep: PeriodicTask,
}

#[derive(Default)]
struct RegistryState {
    /// Sessions that have not been ended
    sessions: HashMap<String, Session>,
    /// Per-session inactivity timers, re-armed on every touch
    expiry_timers: HashMap<String, JoinHandle<()>>,
    /// Keyed by anonymous ID
    users: HashMap<String, UserEntry>,
}

struct UserEntry {
    user: User,
    last_access: i64,
}

/// A storage write detached from the caller
enum SideWrite {
    SaveSession(Session),
    UpdateSession { id: String, update: SessionUpdate },
    SaveUser(User),
    /// Resolved once every earlier write has been applied
    Barrier(oneshot::Sender<()>),
}

/// Apply side writes in order until the registry is dropped
fn spawn_writer(
    storage: Arc<dyn StorageAdapter>,
    mut rx: mpsc::UnboundedReceiver<SideWrite>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let (record, id, result) = match write {
                SideWrite::SaveSession(session) => {
                    ("session", session.id.clone(), storage.save_session(&session).await)
                }
                SideWrite::UpdateSession { id, update } => {
                    let result = storage.update_session(&id, &update).await;
                    ("session", id, result)
                }
                SideWrite::SaveUser(user) => {
                    ("user", user.anonymous_id.clone(), storage.save_user(&user).await)
                }
                SideWrite::Barrier(done) => {
                    let _ = done.send(());
                    continue;
                }
            };
            if let Err(e) = result {
                tracing::warn!(record, id = %id, error = %e, "side write failed");
            }
        }
    })
}

impl SessionRegistry {
    pub fn new(
        config: &SessionConfig,
        storage: Arc<dyn StorageAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        spawn_writer(storage.clone(), rx);

        Self {
            inner: Arc::new(RegistryInner {
                timeout_ms: duration_millis(config.timeout),
                retention_ms: duration_millis(config.user_retention),
                storage,
                clock,
                writes,
                state: Mutex::new(RegistryState::default()),
                session_sweep: PeriodicTask::new("session-sweep", config.sweep_interval),
                user_sweep: PeriodicTask::new("user-sweep", config.user_sweep_interval),
            }),
        }
    }

    /// Start the periodic session and user sweeps
    pub fn start(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.session_sweep.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    SessionRegistry { inner }.sweep_expired();
                }
            }
        });

        let weak = Arc::downgrade(&self.inner);
        self.inner.user_sweep.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    SessionRegistry { inner }.sweep_users();
                }
            }
        });
    }

    pub fn stop(&self) {
        self.inner.session_sweep.stop();
        self.inner.user_sweep.stop();
    }

    /// Return the active session for this identity, creating one if needed.
    ///
    /// A `user_id` match beats an `anonymous_id` match. Among several
    /// matches of the same kind the most recently active session wins. An
    /// anonymous match is skipped when it belongs to a different user. With
    /// no identity at all a fresh anonymous ID is generated.
    pub fn resolve(&self, user_id: Option<&str>, anonymous_id: Option<&str>) -> Resolved {
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.state.lock();

        if let Some(session) = find_active(
            &state.sessions,
            user_id,
            anonymous_id,
            now,
            self.inner.timeout_ms,
        ) {
            return Resolved {
                session: session.clone(),
                created: false,
            };
        }

        let anonymous_id = anonymous_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session::new(
            Uuid::new_v4().to_string(),
            user_id.map(str::to_string),
            anonymous_id,
            now,
        );

        state.sessions.insert(session.id.clone(), session.clone());
        self.arm_expiry(&mut state, &session.id, self.inner.timeout_ms);
        drop(state);

        tracing::debug!(session_id = %session.id, anonymous_id = %session.anonymous_id, "session started");

        self.side_write(SideWrite::SaveSession(session.clone()));

        Resolved {
            session,
            created: true,
        }
    }

    /// Active session by ID
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let now = self.inner.clock.now_millis();
        self.inner
            .state
            .lock()
            .sessions
            .get(session_id)
            .filter(|s| s.is_active(now, self.inner.timeout_ms))
            .cloned()
    }

    /// Record activity on a session and reset its expiry timer.
    ///
    /// Returns the updated session, or `None` if it is unknown or ended.
    pub fn touch(&self, session_id: &str) -> Option<Session> {
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.state.lock();

        let session = state.sessions.get_mut(session_id)?;
        session.record_activity(now);
        let session = session.clone();
        self.arm_expiry(&mut state, session_id, self.inner.timeout_ms);
        drop(state);

        self.side_write(SideWrite::UpdateSession {
            id: session.id.clone(),
            update: SessionUpdate::from_session(&session),
        });

        Some(session)
    }

    /// End a session now and evict it from memory
    pub fn end(&self, session_id: &str) -> Option<Session> {
        let now = self.inner.clock.now_millis();
        let session = {
            let mut state = self.inner.state.lock();
            self.evict(&mut state, session_id, now)?
        };
        tracing::debug!(session_id = %session.id, events = session.event_count, "session ended");
        Some(session)
    }

    /// End every session idle for longer than the timeout
    pub fn sweep_expired(&self) -> Vec<Session> {
        let now = self.inner.clock.now_millis();
        let timeout_ms = self.inner.timeout_ms;
        let mut state = self.inner.state.lock();

        let expired: Vec<String> = state
            .sessions
            .values()
            .filter(|s| !s.is_active(now, timeout_ms))
            .map(|s| s.id.clone())
            .collect();

        let ended: Vec<Session> = expired
            .iter()
            .filter_map(|id| self.evict(&mut state, id, now))
            .collect();
        drop(state);

        if !ended.is_empty() {
            tracing::info!(count = ended.len(), "expired idle sessions");
        }
        ended
    }

    /// Merge traits into the user keyed by `anonymous_id`, creating it if
    /// needed, and attach `user_id`.
    pub async fn identify(
        &self,
        user_id: &str,
        anonymous_id: &str,
        traits: Option<Map<String, Value>>,
    ) -> User {
        self.ensure_user_loaded(anonymous_id).await;

        let now = self.inner.clock.now_millis();
        let (user, linked) = {
            let mut state = self.inner.state.lock();
            let entry = match state.users.entry(anonymous_id.to_string()) {
                Entry::Occupied(occupied) => {
                    let entry = occupied.into_mut();
                    entry.user.touch(now);
                    entry
                }
                Entry::Vacant(vacant) => vacant.insert(UserEntry {
                    user: User::new(anonymous_id.to_string(), now),
                    last_access: now,
                }),
            };

            entry.user.id = Some(user_id.to_string());
            if let Some(traits) = traits {
                entry.user.merge_traits(traits);
            }
            entry.last_access = now;
            let user = entry.user.clone();

            // Later events from this device resolve by user ID too
            let mut linked = Vec::new();
            for session in state.sessions.values_mut() {
                if session.anonymous_id == anonymous_id && session.user_id.is_none() {
                    session.user_id = Some(user_id.to_string());
                    linked.push(session.id.clone());
                }
            }
            (user, linked)
        };

        self.persist_user(&user);
        for id in linked {
            self.side_write(SideWrite::UpdateSession {
                id,
                update: SessionUpdate {
                    user_id: Some(user_id.to_string()),
                    ..SessionUpdate::default()
                },
            });
        }
        user
    }

    /// Insert or replace consent for an identity
    pub async fn set_consent(&self, anonymous_id: &str, consent: Consent) -> User {
        self.ensure_user_loaded(anonymous_id).await;

        let now = self.inner.clock.now_millis();
        let user = {
            let mut state = self.inner.state.lock();
            let entry = state
                .users
                .entry(anonymous_id.to_string())
                .or_insert_with(|| UserEntry {
                    user: User::new(anonymous_id.to_string(), now),
                    last_access: now,
                });
            entry.user.consent = Some(consent);
            entry.user.touch(now);
            entry.last_access = now;
            entry.user.clone()
        };

        self.persist_user(&user);
        user
    }

    /// Consent recorded for an identity, from memory or storage.
    ///
    /// Storage failures are logged and treated as "no consent recorded".
    pub async fn consent_for(
        &self,
        user_id: Option<&str>,
        anonymous_id: Option<&str>,
    ) -> Option<Consent> {
        if let Some(user) = self.cached_user(user_id, anonymous_id) {
            return user.consent;
        }

        let keys = anonymous_id
            .map(|a| UserKey::AnonymousId(a.to_string()))
            .into_iter()
            .chain(user_id.map(|u| UserKey::Id(u.to_string())));

        for key in keys {
            match self.inner.storage.get_user(&key).await {
                Ok(Some(user)) => {
                    let consent = user.consent;
                    self.cache_user(user);
                    return consent;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "consent lookup failed");
                    return None;
                }
            }
        }
        None
    }

    /// Cached user record by anonymous ID
    pub fn user(&self, anonymous_id: &str) -> Option<User> {
        self.inner
            .state
            .lock()
            .users
            .get(anonymous_id)
            .map(|e| e.user.clone())
    }

    /// Evict user records untouched for longer than the retention window
    pub fn sweep_users(&self) -> usize {
        let now = self.inner.clock.now_millis();
        let retention_ms = self.inner.retention_ms;
        let mut state = self.inner.state.lock();

        let before = state.users.len();
        state
            .users
            .retain(|_, entry| now - entry.last_access <= retention_ms);
        let evicted = before - state.users.len();
        drop(state);

        if evicted > 0 {
            tracing::info!(count = evicted, "evicted idle user records");
        }
        evicted
    }

    /// Number of sessions not yet ended (including idle ones awaiting sweep)
    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn active_count(&self) -> usize {
        let now = self.inner.clock.now_millis();
        self.inner
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_active(now, self.inner.timeout_ms))
            .count()
    }

    pub fn user_count(&self) -> usize {
        self.inner.state.lock().users.len()
    }

    /// Wait until every side write queued so far has been applied
    pub async fn flush_writes(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.writes.send(SideWrite::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drop all in-memory state and cancel expiry timers
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for (_, timer) in state.expiry_timers.drain() {
            timer.abort();
        }
        state.sessions.clear();
        state.users.clear();
    }

    fn cached_user(&self, user_id: Option<&str>, anonymous_id: Option<&str>) -> Option<User> {
        let now = self.inner.clock.now_millis();
        let mut state = self.inner.state.lock();

        let key = anonymous_id
            .filter(|a| state.users.contains_key(*a))
            .map(str::to_string)
            .or_else(|| {
                let user_id = user_id?;
                state
                    .users
                    .iter()
                    .find(|(_, e)| e.user.id.as_deref() == Some(user_id))
                    .map(|(k, _)| k.clone())
            })?;

        let entry = state.users.get_mut(&key)?;
        entry.last_access = now;
        Some(entry.user.clone())
    }

    fn cache_user(&self, user: User) {
        let now = self.inner.clock.now_millis();
        self.inner
            .state
            .lock()
            .users
            .entry(user.anonymous_id.clone())
            .or_insert(UserEntry {
                user,
                last_access: now,
            });
    }

    /// Pull a previously evicted user back from storage before mutating it
    async fn ensure_user_loaded(&self, anonymous_id: &str) {
        if self.inner.state.lock().users.contains_key(anonymous_id) {
            return;
        }
        match self
            .inner
            .storage
            .get_user(&UserKey::AnonymousId(anonymous_id.to_string()))
            .await
        {
            Ok(Some(user)) => self.cache_user(user),
            Ok(None) => {}
            Err(e) => tracing::warn!(anonymous_id, error = %e, "user lookup failed"),
        }
    }

    fn persist_user(&self, user: &User) {
        self.side_write(SideWrite::SaveUser(user.clone()));
    }

    /// Remove a session from memory, mark it ended and persist the end
    fn evict(&self, state: &mut RegistryState, session_id: &str, now: i64) -> Option<Session> {
        if let Some(timer) = state.expiry_timers.remove(session_id) {
            timer.abort();
        }
        let mut session = state.sessions.remove(session_id)?;
        session.end(now);

        self.side_write(SideWrite::UpdateSession {
            id: session.id.clone(),
            update: SessionUpdate::from_session(&session),
        });

        Some(session)
    }

    /// (Re)arm the inactivity timer of a session
    fn arm_expiry(&self, state: &mut RegistryState, session_id: &str, after_ms: i64) {
        if let Some(old) = state.expiry_timers.remove(session_id) {
            old.abort();
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let id = session_id.to_string();
        let delay = Duration::from_millis(after_ms.max(0) as u64);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                SessionRegistry { inner }.expire_if_idle(&id);
            }
        });
        state.expiry_timers.insert(session_id.to_string(), handle);
    }

    fn expire_if_idle(&self, session_id: &str) {
        let now = self.inner.clock.now_millis();
        let timeout_ms = self.inner.timeout_ms;
        let mut state = self.inner.state.lock();

        let remaining = match state.sessions.get(session_id) {
            None => return,
            Some(s) => timeout_ms - (now - s.last_activity_time),
        };

        if remaining > 0 {
            // Clock and timer disagree; wait out the rest
            state.expiry_timers.remove(session_id);
            self.arm_expiry(&mut state, session_id, remaining);
            return;
        }

        // This task is the timer being removed; it must not abort itself
        state.expiry_timers.remove(session_id);
        if let Some(session) = self.evict(&mut state, session_id, now) {
            tracing::debug!(session_id = %session.id, "session timed out");
        }
    }

    /// Hand a write to the writer task; never waits, never fails
    fn side_write(&self, write: SideWrite) {
        if self.inner.writes.send(write).is_err() {
            tracing::warn!("storage writer is gone, dropping side write");
        }
    }
}

fn find_active<'a>(
    sessions: &'a HashMap<String, Session>,
    user_id: Option<&str>,
    anonymous_id: Option<&str>,
    now: i64,
    timeout_ms: i64,
) -> Option<&'a Session> {
    let most_recent = |a: &&Session, b: &&Session| {
        a.last_activity_time
            .cmp(&b.last_activity_time)
            .then_with(|| a.start_time.cmp(&b.start_time))
            .then_with(|| a.id.cmp(&b.id))
    };
    let active = || sessions.values().filter(|s| s.is_active(now, timeout_ms));

    if let Some(user_id) = user_id {
        let by_user = active()
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .max_by(most_recent);
        if by_user.is_some() {
            return by_user;
        }
    }

    let anonymous_id = anonymous_id?;
    active()
        .filter(|s| s.anonymous_id == anonymous_id)
        .filter(|s| match (user_id, s.user_id.as_deref()) {
            (Some(wanted), Some(owner)) => wanted == owner,
            _ => true,
        })
        .max_by(most_recent)
}
