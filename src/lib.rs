//! Event Ingestion Server
//!
//! Collects user-interaction events from client applications, ties them to
//! sessions and users, buffers them for batched durable storage and
//! rebroadcasts them to live subscribers.
//!
//! # Features
//!
//! - **Sessions**: one active session per identity, ended on inactivity
//! - **Batching**: bounded queue with size/time flushes and retries
//! - **Realtime**: WebSocket and SSE fan-out of tracked events
//! - **Consent**: optional privacy mode that only admits consenting users
//! - **Pluggable storage**: in-memory or append-only JSON-lines files
//!
//! # Modules
//!
//! - `types`: Core data structures (Event, Session, User, filters, stats)
//! - `session`: Session and user registry with expiry
//! - `queue`: Batch queue between tracking and storage
//! - `realtime`: Subscriber registry and broadcaster
//! - `storage`: Storage adapter trait and backends
//! - `tracker`: The ingestion coordinator
//! - `api`: HTTP, WebSocket and SSE endpoints
//! - `config`: Environment-driven configuration
//! - `validation`: Input checks for the HTTP surface
//! - `utils`: Clocks, periodic tasks, atomic file writes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use event_ingest::{storage::MemoryStorage, TrackRequest, Tracker, TrackerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TrackerConfig::default();
//!     let tracker = Tracker::new(&config, Arc::new(MemoryStorage::new()));
//!     tracker.init().await.unwrap();
//!
//!     let outcome = tracker
//!         .track(TrackRequest::new("page_view").anonymous("anon-1"))
//!         .await
//!         .unwrap();
//!     println!("tracked {}", outcome.event.id);
//!
//!     tracker.shutdown().await;
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod queue;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export commonly used items at crate root
pub use config::TrackerConfig;
pub use error::{StorageError, TrackerError, TrackerResult};
pub use queue::BatchQueue;
pub use realtime::{Broadcaster, StreamMessage, Subscriber};
pub use session::SessionRegistry;
pub use storage::StorageAdapter;
pub use tracker::{TrackOutcome, TrackRequest, Tracker};
pub use types::{Consent, Event, EventContext, EventFilter, EventStats, Session, User};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
