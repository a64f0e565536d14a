//! Server-Sent Events (SSE) feed of recorded analytics events

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::AppState;

pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = BroadcastStream::new(rx);

    // Lagged receivers skip what they missed
    let event_stream = stream.filter_map(|result| match result {
        Ok(event) => {
            let json = serde_json::to_string(&*event).ok()?;
            Some(Ok(Event::default().data(json).event(event.name())))
        }
        Err(_) => None,
    });

    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
