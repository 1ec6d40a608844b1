//! Input validation for the HTTP surface
//!
//! Identity-like strings (user, anonymous and session IDs) are restricted
//! to `[a-zA-Z0-9_-]{1,50}`.

mod fields;

pub use fields::{
    validate_batch_len, validate_event_type, validate_identifier, validate_limit,
    validate_optional_identifier, MAX_BATCH_EVENTS, MAX_EVENT_TYPE_LEN, MAX_IDENTIFIER_LEN,
    MAX_QUERY_LIMIT,
};
