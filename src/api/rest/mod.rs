//! REST endpoints
//!
//! - `POST /events`, `POST /events/batch`, `GET /events`
//! - `GET /stats`
//! - `POST /identify`, `POST /consent`
//! - `DELETE /sessions/:id`

pub mod events;
pub mod identity;
pub mod sessions;
pub mod stats;

use serde::Serialize;

/// Successful response wrapper; the payload fields sit next to `success`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
