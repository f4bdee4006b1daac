//! Services layer - Business logic
//!
//! This module contains the business logic of the Rollcall check-in service.
//! Services are responsible for:
//! - Admitting check-ins against session capacity
//! - Coordinating between repositories and cache
//! - Driving session lifecycle transitions
//! - Publishing events to connected clients

pub mod admission;
pub mod check_in;
pub mod entity_cache;
pub mod lifecycle;
pub mod notifier;
pub mod participant;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use admission::{AdmissionController, AdmissionError, ReconcileReport, Reservation};
pub use check_in::{CheckInError, CheckInService};
pub use entity_cache::{CachedLoader, CachedValue, EntityCache};
pub use lifecycle::{decide_transition, LifecycleScheduler, TickReport};
pub use notifier::{BroadcastNotifier, DynEventSink, LifecycleEventSink};
pub use participant::{generate_qr_code, ParticipantService, ParticipantServiceError};
pub use session::{SessionService, SessionServiceError};
