//! Ingestion coordinator
//!
//! `Tracker` wires the session registry, batch queue, broadcaster and
//! storage together and runs each tracked event through them:
//!
//! ```text
//! track ─► resolve session ─► build + validate ─► consent gate ─┬─► skipped
//!                                                               │
//!                                      enqueue ─► touch session ◄┘
//!                                                    │
//!                                    broadcast new session + event (if enabled)
//! ```
//!
//! Persistence is asynchronous: `track` returns as soon as the event is
//! queued, before storage has seen it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::error::{StorageResult, TrackerError, TrackerResult};
use crate::queue::{BatchQueue, QueueStats};
use crate::realtime::Broadcaster;
use crate::session::SessionRegistry;
use crate::storage::StorageAdapter;
use crate::types::{
    Consent, Event, EventContext, EventFilter, EventStats, Properties, Session, User,
};
use crate::utils::{duration_millis, Clock, SystemClock};

/// Input to `Tracker::track`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub context: Option<EventContext>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
}

impl TrackRequest {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn anonymous(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }
}

/// Result of a single `track` call
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub event: Event,
    /// False when the consent gate skipped the event. Nothing was queued or
    /// broadcast in that case.
    pub admitted: bool,
    /// True when the event started a new session
    pub session_created: bool,
}

/// Per-item results of `track_batch`
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub admitted: Vec<Event>,
    pub skipped: Vec<Event>,
    /// Item index and the error it failed with
    pub failed: Vec<(usize, TrackerError)>,
}

/// Snapshot for `/health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub initialized: bool,
    pub storage: &'static str,
    pub queue_size: usize,
    pub failed_count: u64,
    pub queue: QueueStats,
    pub active_sessions: usize,
    pub subscribers: usize,
    pub realtime: bool,
}

/// The ingestion pipeline
pub struct Tracker {
    storage: Arc<dyn StorageAdapter>,
    sessions: SessionRegistry,
    queue: BatchQueue,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    privacy_mode: bool,
    shutdown_timeout: Duration,
    initialized: AtomicBool,
}

impl Tracker {
    /// Must be called inside a tokio runtime
    pub fn new(config: &TrackerConfig, storage: Arc<dyn StorageAdapter>) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &TrackerConfig,
        storage: Arc<dyn StorageAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionRegistry::new(&config.session, storage.clone(), clock.clone());
        let queue = BatchQueue::new(config.queue.clone(), storage.clone(), clock.clone());
        let broadcaster = Arc::new(Broadcaster::new(
            config.realtime.enabled,
            config.realtime.sweep_interval,
            clock.clone(),
        ));

        Self {
            storage,
            sessions,
            queue,
            broadcaster,
            clock,
            privacy_mode: config.privacy.privacy_mode,
            shutdown_timeout: config.queue.shutdown_timeout,
            initialized: AtomicBool::new(false),
        }
    }

    /// Connect storage and start every periodic task
    pub async fn init(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.connect().await?;
        self.sessions.start();
        self.queue.start();
        self.broadcaster.start();
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            storage = self.storage.name(),
            privacy_mode = self.privacy_mode,
            realtime = self.broadcaster.enabled(),
            "tracker initialized"
        );
        Ok(())
    }

    /// Stop timers, flush what is queued, drop in-memory state and
    /// disconnect storage. Events still queued after the shutdown timeout
    /// are lost.
    pub async fn shutdown(&self) {
        tracing::info!(queued = self.queue.len(), "tracker shutting down");
        self.sessions.stop();
        self.broadcaster.stop();

        let remaining = self.queue.shutdown().await;

        if tokio::time::timeout(self.shutdown_timeout, self.sessions.flush_writes())
            .await
            .is_err()
        {
            tracing::warn!("pending session writes did not finish before shutdown");
        }

        self.sessions.clear();
        self.broadcaster.clear();
        if let Err(e) = self.storage.disconnect().await {
            tracing::warn!(error = %e, "storage disconnect failed");
        }
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!(lost = remaining, "tracker stopped");
    }

    /// Record one event
    pub async fn track(&self, request: TrackRequest) -> TrackerResult<TrackOutcome> {
        let TrackRequest {
            event_type,
            properties,
            context,
            session_id,
            user_id,
            anonymous_id,
        } = request;

        // Reject before a session gets created for it
        if event_type.trim().is_empty() {
            return Err(TrackerError::validation("missing required fields: type"));
        }

        let (session, session_created) =
            match session_id.as_deref().and_then(|id| self.sessions.get(id)) {
                Some(session) => (session, false),
                None => {
                    let resolved = self
                        .sessions
                        .resolve(user_id.as_deref(), anonymous_id.as_deref());
                    (resolved.session, resolved.created)
                }
            };

        let event = Event {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: self.clock.now_millis(),
            session_id: session.id.clone(),
            user_id: user_id.or_else(|| session.user_id.clone()),
            anonymous_id: anonymous_id.or_else(|| Some(session.anonymous_id.clone())),
            properties,
            context: context.unwrap_or_default(),
            metadata: None,
        };

        let missing = event.missing_fields();
        if !missing.is_empty() {
            return Err(TrackerError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !self.consent_allows(&event).await {
            tracing::debug!(event_id = %event.id, "event skipped without analytics consent");
            return Ok(TrackOutcome {
                event,
                admitted: false,
                session_created,
            });
        }

        if let Err(e) = self.queue.enqueue(event.clone()) {
            self.broadcaster.broadcast_error(&e.to_string());
            return Err(e);
        }
        self.sessions.touch(&event.session_id);
        if session_created {
            self.broadcaster.broadcast_session(&session);
        }
        self.broadcaster.broadcast_event(&event);

        Ok(TrackOutcome {
            event,
            admitted: true,
            session_created,
        })
    }

    /// Track each request independently; one failure does not stop the rest
    pub async fn track_batch(&self, requests: Vec<TrackRequest>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, request) in requests.into_iter().enumerate() {
            match self.track(request).await {
                Ok(TrackOutcome {
                    event,
                    admitted: true,
                    ..
                }) => outcome.admitted.push(event),
                Ok(TrackOutcome { event, .. }) => outcome.skipped.push(event),
                Err(e) => outcome.failed.push((index, e)),
            }
        }
        if !outcome.failed.is_empty() {
            tracing::warn!(
                failed = outcome.failed.len(),
                admitted = outcome.admitted.len(),
                "batch partially rejected"
            );
        }
        outcome
    }

    pub async fn identify(
        &self,
        user_id: &str,
        anonymous_id: &str,
        traits: Option<Map<String, Value>>,
    ) -> User {
        self.sessions.identify(user_id, anonymous_id, traits).await
    }

    pub async fn set_consent(&self, anonymous_id: &str, consent: Consent) -> User {
        self.sessions.set_consent(anonymous_id, consent).await
    }

    /// End a session and broadcast its final state
    pub fn end_session(&self, session_id: &str) -> Option<Session> {
        let session = self.sessions.end(session_id)?;
        self.broadcaster.broadcast_session(&session);
        Some(session)
    }

    /// Events already written to storage
    pub async fn query_events(&self, filter: &EventFilter) -> TrackerResult<Vec<Event>> {
        Ok(self.storage.get_events(filter).await?)
    }

    /// Aggregate stats from storage, also pushed to subscribers
    pub async fn stats(&self, filter: &EventFilter) -> TrackerResult<EventStats> {
        let stats = self.storage.get_event_stats(filter).await?;
        self.broadcaster.broadcast_stats(&stats);
        Ok(stats)
    }

    /// Delete stored events older than `max_age`
    pub async fn prune_events(&self, max_age: Duration) -> TrackerResult<u64> {
        let cutoff = self.clock.now_millis() - duration_millis(max_age);
        let deleted = self.storage.delete_old_events(cutoff).await?;
        tracing::info!(deleted, cutoff, "pruned old events");
        Ok(deleted)
    }

    /// Write one batch now instead of waiting for the timer
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    pub fn health(&self) -> Health {
        let initialized = self.initialized.load(Ordering::SeqCst);
        let queue = self.queue.stats();
        Health {
            status: if initialized { "healthy" } else { "starting" },
            initialized,
            storage: self.storage.name(),
            queue_size: queue.queued,
            failed_count: queue.failed,
            queue,
            active_sessions: self.sessions.active_count(),
            subscribers: self.broadcaster.subscriber_count(),
            realtime: self.broadcaster.enabled(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn queue(&self) -> &BatchQueue {
        &self.queue
    }

    async fn consent_allows(&self, event: &Event) -> bool {
        if !self.privacy_mode {
            return true;
        }
        self.sessions
            .consent_for(event.user_id.as_deref(), event.anonymous_id.as_deref())
            .await
            .is_some_and(|consent| consent.analytics)
    }
}
