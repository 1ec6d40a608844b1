//! Realtime fan-out to live subscribers
//!
//! The broadcaster pushes tracked events, stats snapshots, session updates
//! and errors to every connected subscriber. Delivery is best effort: a
//! subscriber that fails a send is dropped, and nothing is buffered for it.
//!
//! ## Wire format
//! Every message is a JSON envelope `{"type", "data", "timestamp"}` where
//! `type` is one of `event`, `stats`, `session`, `connection` or `error`.

mod broadcaster;
mod message;

pub use broadcaster::{
    Broadcaster, ChannelTransport, MessageHandler, SendError, Subscriber, SubscriberId,
    SubscriberTransport,
};
pub use message::{StreamKind, StreamMessage};
