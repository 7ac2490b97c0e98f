//! Server-Sent Events feed of transcript changes

use crate::chat::ChatEvent;
use crate::transcript::Message;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert the chat event feed to an SSE stream, starting with an `init`
/// event carrying the current snapshot
pub fn sse_stream(
    messages: &[Message],
    busy: bool,
    events: broadcast::Receiver<ChatEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = json!({
        "type": "init",
        "messages": messages,
        "busy": busy,
    });
    let init = futures::stream::once(async move {
        Ok(Event::default().event("init").data(init.to_string()))
    });

    let updates = BroadcastStream::new(events).filter_map(|result| match result {
        Ok(event) => Some(Ok(chat_event_to_axum(&event))),
        Err(e) => {
            // Lagged receiver; the client resyncs from GET /api/messages
            tracing::debug!(error = %e, "SSE subscriber lagged");
            None
        }
    });

    Sse::new(init.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn chat_event_to_axum(event: &ChatEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        json!({ "type": "error", "message": e.to_string() }).to_string()
    });
    Event::default().event(event.name()).data(data)
}
