//! Bounded event queue with batched, retried storage writes

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::storage::StorageAdapter;
use crate::types::Event;
use crate::utils::{Clock, PeriodicTask};

/// An event waiting to be written
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: String,
    pub event: Event,
    /// Failed write attempts so far
    pub attempts: u32,
    pub enqueued_at: i64,
}

impl QueueItem {
    fn new(event: Event, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event,
            attempts: 0,
            enqueued_at: now,
        }
    }
}

/// Counters reported by `/stats` and `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub written: u64,
    pub batches_written: u64,
    pub failed: u64,
    pub flushing: bool,
}

/// What a single flush call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Idle,
    /// Another flush was in progress; it runs again once it finishes
    Deferred,
    /// A batch of this many events was written
    Written(usize),
    /// The write failed
    Failed { requeued: usize, dropped: usize },
}

/// Resets the in-progress flag even when the flush future is cancelled
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct QueueInner {
    config: QueueConfig,
    storage: Arc<dyn StorageAdapter>,
    clock: Arc<dyn Clock>,
    items: Mutex<VecDeque<QueueItem>>,
    flushing: AtomicBool,
    flush_requested: AtomicBool,
    /// A background flush of full batches is scheduled or running
    size_flush_scheduled: AtomicBool,
    written: AtomicU64,
    batches_written: AtomicU64,
    failed: AtomicU64,
    timer: PeriodicTask,
}

/// Bounded FIFO of events flushed to storage in batches.
///
/// Cloning is cheap and every clone shares the same queue.
#[derive(Clone)]
pub struct BatchQueue {
    inner: Arc<QueueInner>,
}

impl BatchQueue {
    pub fn new(config: QueueConfig, storage: Arc<dyn StorageAdapter>, clock: Arc<dyn Clock>) -> Self {
        let timer = PeriodicTask::new("queue-flush", config.flush_interval);
        Self {
            inner: Arc::new(QueueInner {
                config,
                storage,
                clock,
                items: Mutex::new(VecDeque::new()),
                flushing: AtomicBool::new(false),
                flush_requested: AtomicBool::new(false),
                size_flush_scheduled: AtomicBool::new(false),
                written: AtomicU64::new(0),
                batches_written: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                timer,
            }),
        }
    }

    /// Start the periodic flush timer
    pub fn start(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.timer.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    BatchQueue { inner }.flush().await;
                }
            }
        });
    }

    pub fn stop(&self) {
        self.inner.timer.stop();
    }

    /// Append an event. Once a full batch is queued a background flush is
    /// scheduled; this call never waits on storage.
    ///
    /// Fails with `CapacityExceeded` when the queue is at its bound; the
    /// event is not admitted in that case. Must be called inside a tokio
    /// runtime.
    pub fn enqueue(&self, event: Event) -> TrackerResult<()> {
        let len = self.push(event)?;
        if len >= self.inner.config.batch_size {
            self.schedule_size_flush();
        }
        Ok(())
    }

    /// Append as many events as fit and return how many were admitted.
    ///
    /// Events past the capacity bound are discarded.
    pub fn enqueue_many(&self, events: Vec<Event>) -> usize {
        let total = events.len();
        let admitted = {
            let now = self.inner.clock.now_millis();
            let mut items = self.inner.items.lock();
            let room = self.inner.config.max_queue_size.saturating_sub(items.len());
            let admitted = room.min(total);
            items.extend(
                events
                    .into_iter()
                    .take(admitted)
                    .map(|event| QueueItem::new(event, now)),
            );
            admitted
        };

        if admitted < total {
            tracing::warn!(
                admitted,
                discarded = total - admitted,
                "queue full, batch truncated"
            );
        }

        if self.len() >= self.inner.config.batch_size {
            self.schedule_size_flush();
        }
        admitted
    }

    /// True while a background flush of full batches is pending or running
    pub fn size_flush_pending(&self) -> bool {
        self.inner.size_flush_scheduled.load(Ordering::Acquire)
    }

    /// Write up to one batch from the head of the queue.
    ///
    /// Only one flush runs at a time. A call made while another is running
    /// marks a pending flush, which the running call performs before it
    /// returns.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(guard) = FlushGuard::acquire(&self.inner.flushing) else {
            self.inner.flush_requested.store(true, Ordering::Release);
            return FlushOutcome::Deferred;
        };
        let outcome = self.flush_batch().await;
        drop(guard);

        while self.inner.flush_requested.swap(false, Ordering::AcqRel) && !self.is_empty() {
            let Some(guard) = FlushGuard::acquire(&self.inner.flushing) else {
                break;
            };
            self.flush_batch().await;
            drop(guard);
        }
        outcome
    }

    /// Stop the timer and flush until the queue is empty or the shutdown
    /// timeout passes. Returns the number of events left behind.
    pub async fn shutdown(&self) -> usize {
        self.stop();

        let drain = async {
            loop {
                match self.flush().await {
                    FlushOutcome::Idle => break,
                    FlushOutcome::Deferred => tokio::time::sleep(Duration::from_millis(10)).await,
                    FlushOutcome::Written(_) | FlushOutcome::Failed { .. } => {}
                }
            }
        };

        if tokio::time::timeout(self.inner.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            tracing::warn!(remaining = self.len(), "final flush timed out");
        }

        let remaining = self.len();
        if remaining > 0 {
            tracing::warn!(remaining, "events lost at shutdown");
        }
        remaining
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.len(),
            written: self.inner.written.load(Ordering::Relaxed),
            batches_written: self.inner.batches_written.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            flushing: self.is_flushing(),
        }
    }

    /// Drop everything still queued
    pub fn clear(&self) {
        self.inner.items.lock().clear();
    }

    fn schedule_size_flush(&self) {
        if self.inner.size_flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move { queue.flush_full_batches().await });
    }

    /// Write batches while at least one full batch is queued. Stops at the
    /// first write that does not succeed; the timer retries from there.
    async fn flush_full_batches(self) {
        let batch_size = self.inner.config.batch_size;
        loop {
            while self.len() >= batch_size {
                if !matches!(self.flush().await, FlushOutcome::Written(_)) {
                    self.inner.size_flush_scheduled.store(false, Ordering::Release);
                    return;
                }
            }
            self.inner.size_flush_scheduled.store(false, Ordering::Release);

            // An enqueue may have filled a batch between the check and the reset
            if self.len() < batch_size
                || self.inner.size_flush_scheduled.swap(true, Ordering::AcqRel)
            {
                return;
            }
        }
    }

    fn push(&self, event: Event) -> TrackerResult<usize> {
        let now = self.inner.clock.now_millis();
        let mut items = self.inner.items.lock();
        let max_queue_size = self.inner.config.max_queue_size;
        if items.len() >= max_queue_size {
            return Err(TrackerError::CapacityExceeded { max_queue_size });
        }
        items.push_back(QueueItem::new(event, now));
        Ok(items.len())
    }

    async fn flush_batch(&self) -> FlushOutcome {
        let batch: Vec<QueueItem> = {
            let mut items = self.inner.items.lock();
            let n = self.inner.config.batch_size.min(items.len());
            items.drain(..n).collect()
        };
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let events: Vec<Event> = batch.iter().map(|item| item.event.clone()).collect();
        match self.inner.storage.save_events(&events).await {
            Ok(()) => {
                let count = events.len();
                self.inner.written.fetch_add(count as u64, Ordering::Relaxed);
                self.inner.batches_written.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(count, remaining = self.len(), "batch written");
                FlushOutcome::Written(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, count = events.len(), "batch write failed");
                self.requeue(batch).await
            }
        }
    }

    /// Put a failed batch back at the head of the queue after the retry
    /// delay. Items that used up their attempts, or that no longer fit,
    /// are dropped.
    async fn requeue(&self, batch: Vec<QueueItem>) -> FlushOutcome {
        let max_retries = self.inner.config.max_retries;
        let mut retry = Vec::with_capacity(batch.len());
        let mut dropped = 0;

        for mut item in batch {
            item.attempts += 1;
            if item.attempts < max_retries {
                retry.push(item);
            } else {
                tracing::warn!(
                    event_id = %item.event.id,
                    attempts = item.attempts,
                    "dropping event after repeated write failures"
                );
                dropped += 1;
            }
        }

        let mut requeued = 0;
        if !retry.is_empty() {
            if !self.inner.config.retry_delay.is_zero() {
                tokio::time::sleep(self.inner.config.retry_delay).await;
            }

            let mut items = self.inner.items.lock();
            let room = self.inner.config.max_queue_size.saturating_sub(items.len());
            if retry.len() > room {
                let overflow = retry.len() - room;
                retry.truncate(room);
                tracing::warn!(overflow, "queue refilled during retry delay, dropping overflow");
                dropped += overflow;
            }
            requeued = retry.len();
            for item in retry.into_iter().rev() {
                items.push_front(item);
            }
        }

        self.inner.failed.fetch_add(dropped as u64, Ordering::Relaxed);
        FlushOutcome::Failed { requeued, dropped }
    }
}
