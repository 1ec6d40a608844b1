//! Session lifecycle tracking
//!
//! Sessions are created on the first event of an identity, refreshed on
//! every later event, and ended by an explicit call, by their own inactivity
//! timer, or by the periodic sweep that backs the timers up.

mod registry;

pub use registry::{Resolved, SessionRegistry};
