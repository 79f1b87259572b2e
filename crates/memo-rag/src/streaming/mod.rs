//! Server-sent event streaming of cited answers

pub mod coordinator;

pub use coordinator::{ChatStreamCoordinator, EventStream, StreamState};

use axum::http::{header, HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;

use crate::types::StreamEvent;

/// Encode one event as an SSE data frame
pub fn to_sse_event(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!("Failed to encode stream event: {}", e);
            Event::default().data(r#"{"type":"error","error":"An unexpected error occurred"}"#)
        }
    }
}

/// Wrap an event stream in an SSE response
///
/// Comment frames are sent after `keep_alive` of silence; they never reorder
/// data frames. Proxy buffering is disabled so deltas reach the client as
/// they arrive.
pub fn sse_response(events: EventStream, keep_alive: Duration) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    let sse = Sse::new(frames).keep_alive(KeepAlive::new().interval(keep_alive));

    (
        [
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        sse,
    )
        .into_response()
}
