//! Server-sent event framing for stream subscriptions

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;

use crate::stream::Subscription;

/// Forward a subscription as SSE.
///
/// Each frame becomes one event named after its kind (`data`, `done`,
/// `error`) whose data is the JSON-encoded frame. The response ends after
/// the terminal frame.
pub fn subscription_stream<T>(
    subscription: Subscription<T>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let stream = async_stream::stream! {
        let frames = subscription.into_stream();
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            let data = serde_json::to_string(&frame).unwrap_or_default();
            yield Ok(Event::default().event(frame.kind()).data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
