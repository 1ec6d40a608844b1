//! WebSocket subscriber endpoint at `/ws`
//!
//! Each connection registers a channel-backed subscriber with the
//! broadcaster and forwards every stream message as a text frame.

pub mod events;
pub mod handler;

pub use handler::ws_handler;
