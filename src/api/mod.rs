//! HTTP surface of the ingestion server
//!
//! - `POST /events`, `POST /events/batch` - track events
//! - `GET /events`, `GET /stats` - read back stored events
//! - `POST /identify`, `POST /consent` - identity and consent
//! - `DELETE /sessions/:id` - end a session
//! - `GET /ws`, `GET /stream` - realtime feed over WebSocket or SSE
//! - `GET /health`
//!
//! Every request passes the IP gate (blocklist and per-IP rate limit).

pub mod error;
pub mod http;
pub mod rate_limit;
pub mod rest;
pub mod sse;
pub mod state;
pub mod websocket;

pub use error::ApiError;
pub use http::create_router;
pub use state::AppState;
