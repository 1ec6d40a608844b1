//! SSE handler

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::realtime::{Broadcaster, ChannelTransport, Subscriber, SubscriberId};

/// Unsubscribes when the response stream is dropped
struct Subscription {
    broadcaster: Arc<Broadcaster>,
    id: SubscriberId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
        tracing::debug!(subscriber = %self.id, "sse stream closed");
    }
}

/// GET /stream - Realtime feed as server-sent events
pub async fn sse_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let broadcaster = state.tracker.broadcaster().clone();
    let (transport, mut rx) = ChannelTransport::channel();
    let id = broadcaster
        .subscribe(Subscriber::sendable(transport))
        .ok_or_else(|| ApiError::Unavailable("realtime streaming is disabled".to_string()))?;
    tracing::debug!(subscriber = %id, "sse stream opened");

    let subscription = Subscription { broadcaster, id };
    let stream = async_stream::stream! {
        let _subscription = subscription;
        while let Some(text) = rx.recv().await {
            yield Ok::<_, Infallible>(Event::default().data(text));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default().interval(Duration::from_secs(30))))
}
