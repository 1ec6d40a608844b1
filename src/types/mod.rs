//! Data types for the event ingestion pipeline
//!
//! This module contains the records that flow through the tracker, the
//! session registry and the storage adapters.

mod event;
mod query;
mod session;
mod user;

pub use event::{Event, EventContext, EventSummary, LibraryInfo, PageInfo, Properties, ScreenInfo};
pub use query::{EventFilter, EventStats, TimeRange};
pub use session::{Session, SessionUpdate};
pub use user::{Consent, User, UserKey};
