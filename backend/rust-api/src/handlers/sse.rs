use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    handlers::reject,
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::timer::TimerEvent,
    services::{session_runner::SessionHandle, AppState},
};

/// SSE endpoint for timer events
/// GET /api/v1/sessions/{id}/stream
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.sessions.get(&session_id).await.map_err(reject)?;
    tracing::info!("Client connected to SSE stream: session={}", session_id);

    let events = entry.handle.subscribe_timer();
    let stream = create_timer_stream(entry.handle, events);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Decrements the connection gauge when the client goes away.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    handle: SessionHandle,
    events: broadcast::Receiver<TimerEvent>,
    finished: bool,
    _guard: ConnectionGuard,
}

/// Relays the session's timer events until `time-expired` is sent or the
/// session task stops.
fn create_timer_stream(
    handle: SessionHandle,
    events: broadcast::Receiver<TimerEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        handle,
        events,
        finished: false,
        _guard: ConnectionGuard::new(),
    };

    stream::unfold(initial, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            let received = tokio::select! {
                biased;

                received = state.events.recv() => received,
                _ = state.handle.closed() => return None,
            };

            match received {
                Ok(timer_event) => {
                    state.finished = matches!(timer_event, TimerEvent::TimeExpired(_));
                    let event = Event::default()
                        .event(timer_event.event_name())
                        .data(timer_event.to_sse_data());
                    return Some((Ok(event), state));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        "SSE client lagging: session={}, skipped={}",
                        state.handle.id(),
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
