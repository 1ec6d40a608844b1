//! Utility functions and helpers
//!
//! Clocks, periodic task lifecycles and atomic file writes.

pub mod atomic;
pub mod time;
pub mod timer;

pub use time::{current_timestamp_ms, duration_millis, Clock, ManualClock, SystemClock};
pub use timer::PeriodicTask;
