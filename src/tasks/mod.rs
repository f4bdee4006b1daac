//! Background tasks
//!
//! Long-running loops spawned next to the HTTP server. Each one stops when
//! its cancellation token is triggered.
//!
//! # Tasks
//!
//! - `lifecycle_scheduler` - Opens and ends sessions on their schedule
//! - `reconciliation` - Corrects drifted capacity counters

pub mod lifecycle_scheduler;
pub mod reconciliation;

pub use lifecycle_scheduler::start_lifecycle_scheduler;
pub use reconciliation::start_reconciliation;
