//! Event notifier
//!
//! Producers (scheduler, session administration, check-ins) depend on the
//! [`LifecycleEventSink`] trait handed to them at construction. The
//! [`BroadcastNotifier`] implementation fans events out to every subscriber
//! of a `tokio::sync::broadcast` channel, which is what the SSE endpoint reads.

use crate::models::SessionEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Receiver side of session events
pub trait LifecycleEventSink: Send + Sync {
    /// Publish an event. Must not block and must not fail the caller.
    fn publish(&self, event: SessionEvent);
}

/// Type alias for a shared event sink
pub type DynEventSink = Arc<dyn LifecycleEventSink>;

/// Broadcast-channel notifier
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastNotifier {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl LifecycleEventSink for BroadcastNotifier {
    fn publish(&self, event: SessionEvent) {
        let name = event.name();
        let session_id = event.session_id().to_string();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(target: "rollcall.events", event = name, %session_id, receivers, "Event published");
            }
            Err(_) => {
                tracing::trace!(target: "rollcall.events", event = name, %session_id, "No subscribers for event");
            }
        }
    }
}

/// Sink that keeps every event, for assertions in tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<SessionEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl LifecycleEventSink for RecordingSink {
    fn publish(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LifecycleEvent, SessionStatus, TransitionReason};
    use chrono::Utc;

    fn event(session_id: &str) -> SessionEvent {
        SessionEvent::Lifecycle(LifecycleEvent {
            session_id: session_id.to_string(),
            from: SessionStatus::Open,
            to: SessionStatus::Ended,
            reason: TransitionReason::Manual,
            at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let notifier = BroadcastNotifier::new(8);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.publish(event("s1"));

        assert_eq!(first.recv().await.unwrap().session_id(), "s1");
        assert_eq!(second.recv().await.unwrap().session_id(), "s1");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::default();
        notifier.publish(event("s1"));
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
