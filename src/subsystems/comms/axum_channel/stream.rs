//! `GET /stream`: the push channel as server-sent events.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::future;
use futures_util::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use super::AxumState;

/// Subscribe to frames and count updates. A client that falls behind skips
/// the events it missed. The response ends when the service shuts down.
pub(super) async fn subscribe(
    State(state): State<AxumState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.comms.events.subscribe();
    info!(
        channel_id = %state.channel_id,
        subscribers = state.comms.events.subscriber_count(),
        "stream client connected"
    );

    let stream = BroadcastStream::new(rx)
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(event) => Some(Ok::<_, Infallible>(
                    Event::default().event(event.name()).data(event.payload().to_string()),
                )),
                Err(lagged) => {
                    debug!("stream client lagging: {lagged}");
                    None
                }
            })
        })
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::default())
}
