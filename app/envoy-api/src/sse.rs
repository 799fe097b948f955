//! Server-sent event stream over the event hub.
//!
//! Each connection registers one hub subscription. The first frame is a
//! `connected` event so clients know the stream works before any state
//! arrives; the broadcaster is then asked for a full `init` snapshot.
//! Hub keep-alives render as SSE comments.

use crate::api::AppState;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use envoy_core::hub::HubMessage;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use std::convert::Infallible;

/// `GET /api/events`
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    state.broadcaster.request_init();

    let connected = stream::iter([Ok(Event::default().event("connected").data("{}"))]);
    let updates = stream::unfold(subscription, |mut subscription| async move {
        let message = subscription.recv().await?;
        let event = match message {
            HubMessage::Event { event, data } => Event::default().event(event).data(data),
            HubMessage::KeepAlive => Event::default().comment("keepalive"),
        };
        Some((Ok(event), subscription))
    });

    Sse::new(connected.chain(updates))
}
