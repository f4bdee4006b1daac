//! Event stream endpoint
//!
//! - GET /api/v1/events - Server-Sent Events of lifecycle changes and
//!   check-ins, optionally filtered with `?session_id=`

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::middleware::AppState;
use crate::models::SessionEvent;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session_id: Option<String>,
}

/// Build the events router
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(stream_events))
}

/// GET /api/v1/events
async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = event_stream(state.notifier.subscribe(), query.session_id).map(|event| {
        let sse = Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().comment("unserializable event"));
        Ok(sse)
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keep-alive"))
}

/// Events from `receiver`, restricted to one session when `session_id` is set
///
/// A subscriber that falls behind skips the events it missed.
fn event_stream(
    receiver: broadcast::Receiver<SessionEvent>,
    session_id: Option<String>,
) -> impl Stream<Item = SessionEvent> {
    stream::unfold((receiver, session_id), |(mut receiver, session_id)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if session_id.as_deref().is_some_and(|id| id != event.session_id()) {
                        continue;
                    }
                    return Some((event, (receiver, session_id)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "rollcall.events", skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckInEvent, SessionEvent};
    use crate::services::{BroadcastNotifier, LifecycleEventSink};
    use chrono::Utc;

    fn check_in(session_id: &str) -> SessionEvent {
        SessionEvent::CheckIn(CheckInEvent {
            session_id: session_id.to_string(),
            participant_id: "p1".to_string(),
            check_in_id: "c1".to_string(),
            count: 1,
            removed: false,
            at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_stream_filters_by_session() {
        let notifier = BroadcastNotifier::new(8);
        let events = event_stream(notifier.subscribe(), Some("s2".to_string()));
        futures::pin_mut!(events);

        notifier.publish(check_in("s1"));
        notifier.publish(check_in("s2"));

        let first = events.next().await.unwrap();
        assert_eq!(first.session_id(), "s2");
    }

    #[tokio::test]
    async fn test_lagged_subscriber_resumes() {
        let notifier = BroadcastNotifier::new(2);
        let events = event_stream(notifier.subscribe(), None);
        futures::pin_mut!(events);

        for id in ["s1", "s2", "s3", "s4"] {
            notifier.publish(check_in(id));
        }

        let next = events.next().await.unwrap();
        assert_eq!(next.session_id(), "s3");
    }

    #[tokio::test]
    async fn test_stream_ends_when_notifier_dropped() {
        let notifier = BroadcastNotifier::new(2);
        let events = event_stream(notifier.subscribe(), None);
        drop(notifier);

        let collected: Vec<_> = events.collect().await;
        assert!(collected.is_empty());
    }
}
