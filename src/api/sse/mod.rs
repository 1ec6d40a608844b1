//! Server-sent events subscriber endpoint at `/stream`
//!
//! Same stream messages as the WebSocket endpoint, one SSE `data:` line
//! per message, with a keep-alive comment every 30 seconds.

pub mod handler;

pub use handler::sse_handler;
