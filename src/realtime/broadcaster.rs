//! Subscriber registry and fan-out
//!
//! Unlike a `tokio::sync::broadcast` channel, each subscriber is held
//! individually so that a failed or closed one can be removed on the spot.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use super::message::{StreamKind, StreamMessage};
use crate::utils::{Clock, PeriodicTask};

/// A subscriber could not take the message
#[derive(Debug, Error)]
#[error("subscriber closed")]
pub struct SendError;

/// Transport-backed subscriber (websocket, SSE stream, ...)
pub trait SubscriberTransport: Send + Sync {
    /// Hand over an already-serialized message
    fn send(&self, text: String) -> Result<(), SendError>;

    fn is_open(&self) -> bool;
}

/// In-process subscriber
pub type MessageHandler = Arc<dyn Fn(&StreamMessage) -> Result<(), SendError> + Send + Sync>;

#[derive(Clone)]
pub enum Subscriber {
    Sendable(Arc<dyn SubscriberTransport>),
    Callback(MessageHandler),
}

impl Subscriber {
    pub fn sendable(transport: impl SubscriberTransport + 'static) -> Self {
        Subscriber::Sendable(Arc::new(transport))
    }

    pub fn callback<F>(handler: F) -> Self
    where
        F: Fn(&StreamMessage) -> Result<(), SendError> + Send + Sync + 'static,
    {
        Subscriber::Callback(Arc::new(handler))
    }

    fn deliver(&self, message: &StreamMessage, text: &str) -> Result<(), SendError> {
        match self {
            Subscriber::Sendable(transport) => transport.send(text.to_string()),
            Subscriber::Callback(handler) => handler(message),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            Subscriber::Sendable(transport) => transport.is_open(),
            Subscriber::Callback(_) => true,
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscriber::Sendable(_) => f.write_str("Subscriber::Sendable"),
            Subscriber::Callback(_) => f.write_str("Subscriber::Callback"),
        }
    }
}

/// Transport over an unbounded channel; the receiving half is drained by
/// the websocket or SSE connection task.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SubscriberTransport for ChannelTransport {
    fn send(&self, text: String) -> Result<(), SendError> {
        self.tx.send(text).map_err(|_| SendError)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Fans stream messages out to the current subscriber set
pub struct Broadcaster {
    enabled: AtomicBool,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    clock: Arc<dyn Clock>,
    sweep: PeriodicTask,
}

impl Broadcaster {
    pub fn new(enabled: bool, sweep_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            clock,
            sweep: PeriodicTask::new("subscriber-sweep", sweep_interval),
        }
    }

    /// Start the periodic removal of closed subscribers
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.sweep.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(broadcaster) = weak.upgrade() {
                    broadcaster.sweep_closed();
                }
            }
        });
    }

    pub fn stop(&self) {
        self.sweep.stop();
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Register a subscriber and send it the connection confirmation.
    ///
    /// Returns `None` while disabled, or when the confirmation itself
    /// cannot be delivered.
    pub fn subscribe(&self, subscriber: Subscriber) -> Option<SubscriberId> {
        if !self.enabled() {
            return None;
        }

        let hello = StreamMessage::connected(self.clock.now_millis());
        let text = serialize(&hello)?;
        if subscriber.deliver(&hello, &text).is_err() {
            return None;
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().insert(id, subscriber);
        tracing::debug!(subscriber = %id, "subscriber added");
        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, "subscriber removed");
        }
        removed
    }

    pub fn broadcast_event<T: Serialize>(&self, event: &T) {
        self.broadcast_payload(StreamKind::Event, event);
    }

    pub fn broadcast_stats<T: Serialize>(&self, stats: &T) {
        self.broadcast_payload(StreamKind::Stats, stats);
    }

    pub fn broadcast_session<T: Serialize>(&self, session: &T) {
        self.broadcast_payload(StreamKind::Session, session);
    }

    pub fn broadcast_error(&self, message: &str) {
        if self.enabled() {
            self.broadcast(StreamMessage::error(message, self.clock.now_millis()));
        }
    }

    /// Push a message to every subscriber, dropping the ones that fail.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, message: StreamMessage) -> usize {
        if !self.enabled() {
            return 0;
        }
        let Some(text) = serialize(&message) else {
            return 0;
        };

        let targets: Vec<(SubscriberId, Subscriber)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, subscriber) in targets {
            match subscriber.deliver(&message, &text) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(id),
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &failed {
                subscribers.remove(id);
            }
            tracing::debug!(pruned = failed.len(), "dropped subscribers after failed send");
        }
        delivered
    }

    /// Remove subscribers whose transport reports closed
    pub fn sweep_closed(&self) -> usize {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|_, sub| sub.is_open());
        let removed = before - subscribers.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = subscribers.len(), "swept closed subscribers");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    fn broadcast_payload<T: Serialize>(&self, kind: StreamKind, payload: &T) {
        if !self.enabled() {
            return;
        }
        match serde_json::to_value(payload) {
            Ok(data) => {
                self.broadcast(StreamMessage::new(kind, data, self.clock.now_millis()));
            }
            Err(e) => tracing::warn!(error = %e, ?kind, "failed to serialize broadcast payload"),
        }
    }
}

fn serialize(message: &StreamMessage) -> Option<String> {
    match message.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize stream message");
            None
        }
    }
}
