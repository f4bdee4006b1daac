//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the operations for a specific entity.

pub mod check_in;
pub mod participant;
pub mod session;

pub use check_in::{CheckInRepository, SqlxCheckInRepository};
pub use participant::{ParticipantRepository, SqlxParticipantRepository};
pub use session::{CounterDrift, SessionRepository, SqlxSessionRepository};

/// Whether a repository error was caused by a unique or primary key constraint
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}
