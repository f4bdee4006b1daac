//! Events published to connected clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionStatus;

/// Why a session changed status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    AutoOpen,
    AutoEnd,
    Manual,
}

/// A session status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub session_id: String,
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// A check-in admitted or removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInEvent {
    pub session_id: String,
    pub participant_id: String,
    pub check_in_id: String,
    /// Session occupancy after the change
    pub count: i64,
    pub removed: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Lifecycle(LifecycleEvent),
    CheckIn(CheckInEvent),
}

impl SessionEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lifecycle(_) => "lifecycle",
            Self::CheckIn(_) => "check_in",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::Lifecycle(e) => &e.session_id,
            Self::CheckIn(e) => &e.session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_event_json_shape() {
        let event = SessionEvent::Lifecycle(LifecycleEvent {
            session_id: "s1".to_string(),
            from: SessionStatus::Scheduled,
            to: SessionStatus::Open,
            reason: TransitionReason::AutoOpen,
            at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "lifecycle");
        assert_eq!(json["from"], "SCHEDULED");
        assert_eq!(json["to"], "OPEN");
        assert_eq!(json["reason"], "auto_open");
        assert_eq!(event.name(), "lifecycle");
        assert_eq!(event.session_id(), "s1");
    }
}
