//! Participant and registration models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Code printed on the participant's badge
    pub qr_code: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a participant
///
/// A QR code is generated when none is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParticipantInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
}

/// A participant's registration for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub participant_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}
