//! Field-level checks returning `TrackerError::Validation`

use crate::error::{TrackerError, TrackerResult};

pub const MAX_IDENTIFIER_LEN: usize = 50;
pub const MAX_EVENT_TYPE_LEN: usize = 100;
pub const MAX_BATCH_EVENTS: usize = 1_000;
pub const MAX_QUERY_LIMIT: usize = 10_000;

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Check an identity-like value against `[a-zA-Z0-9_-]{1,50}`
pub fn validate_identifier(field: &str, value: &str) -> TrackerResult<()> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(TrackerError::validation(format!(
            "{field} must be 1-{MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !value.chars().all(is_identifier_char) {
        return Err(TrackerError::validation(format!(
            "{field} may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

pub fn validate_optional_identifier(field: &str, value: Option<&str>) -> TrackerResult<()> {
    match value {
        Some(value) => validate_identifier(field, value),
        None => Ok(()),
    }
}

/// Event types are free text but must be non-blank and bounded
pub fn validate_event_type(event_type: &str) -> TrackerResult<()> {
    if event_type.trim().is_empty() {
        return Err(TrackerError::validation("type is required"));
    }
    if event_type.chars().count() > MAX_EVENT_TYPE_LEN {
        return Err(TrackerError::validation(format!(
            "type must be at most {MAX_EVENT_TYPE_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_batch_len(len: usize) -> TrackerResult<()> {
    match len {
        0 => Err(TrackerError::validation("events must not be empty")),
        n if n > MAX_BATCH_EVENTS => Err(TrackerError::validation(format!(
            "at most {MAX_BATCH_EVENTS} events per batch"
        ))),
        _ => Ok(()),
    }
}

pub fn validate_limit(limit: Option<usize>) -> TrackerResult<()> {
    match limit {
        Some(0) => Err(TrackerError::validation("limit must be positive")),
        Some(n) if n > MAX_QUERY_LIMIT => Err(TrackerError::validation(format!(
            "limit must be at most {MAX_QUERY_LIMIT}"
        ))),
        _ => Ok(()),
    }
}
