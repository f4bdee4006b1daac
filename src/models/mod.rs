//! Data models
//!
//! Models represent:
//! - Database entities (Session, Participant, Registration, CheckIn)
//! - API request/response types
//! - Events published to connected clients

mod check_in;
mod event;
mod participant;
mod session;

pub use check_in::{is_late, CheckIn, CheckInMethod, CheckInResult, CreateCheckInInput, ScanCheckInInput};
pub use event::{CheckInEvent, LifecycleEvent, SessionEvent, TransitionReason};
pub use participant::{CreateParticipantInput, Participant, Registration};
pub use session::{CapacityStatus, CreateSessionInput, Session, SessionStats, SessionStatus, NEAR_CAPACITY_PERCENT};
