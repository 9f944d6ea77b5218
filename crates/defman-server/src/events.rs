//! `GET /events`: the status sink as server-sent events.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use defman_core::StatusEvent;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;
use crate::error::strip_paths;

/// One SSE frame per status event, named after its phase.
pub fn to_sse(event: &StatusEvent) -> Event {
    let frame = Event::default().event(event.phase.clone());
    match serde_json::to_string(&redact_event(event)) {
        Ok(data) => frame.data(data),
        Err(e) => frame.comment(format!("unserializable event: {e}")),
    }
}

/// The event as sent to clients, filesystem paths removed.
pub fn redact_event(event: &StatusEvent) -> StatusEvent {
    StatusEvent {
        message: strip_paths(&event.message),
        ..event.clone()
    }
}

pub async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    let frames = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(frames).keep_alive(KeepAlive::default())
}
