use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::ExamError;
use crate::extractors::AuthUser;
use crate::metrics::SSE_CONNECTIONS_ACTIVE;
use crate::models::events::ExamEvent;
use crate::services::AppState;

/// SSE endpoint for timer ticks, directives and lifecycle events
/// GET /api/v1/exams/{id}/stream
pub async fn exam_stream(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ExamError> {
    let events = state.exams.subscribe(&session_id, &claims.sub).await?;
    tracing::info!(
        "Client connected to exam stream: session={}, user={}",
        session_id,
        claims.sub
    );

    Ok(Sse::new(event_stream(session_id, events)).keep_alive(KeepAlive::default()))
}

struct StreamState {
    session_id: String,
    events: broadcast::Receiver<ExamEvent>,
    finished: bool,
    _connection: ConnectionGuard,
}

struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

/// Relays session events until the session finishes or its channel closes.
/// A subscriber that falls behind skips the missed events.
fn event_stream(
    session_id: String,
    events: broadcast::Receiver<ExamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        session_id,
        events,
        finished: false,
        _connection: ConnectionGuard::open(),
    };

    stream::unfold(initial, |mut state| async move {
        if state.finished {
            tracing::debug!("Exam stream closed: session={}", state.session_id);
            return None;
        }

        loop {
            match state.events.recv().await {
                Ok(event) => {
                    state.finished = matches!(event, ExamEvent::SessionFinished(_));
                    let sse = Event::default()
                        .event(event.event_name())
                        .data(event.to_sse_data());
                    return Some((Ok(sse), state));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Exam stream lagging: session={}, skipped={}",
                        state.session_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Exam event channel closed: session={}", state.session_id);
                    return None;
                }
            }
        }
    })
}
