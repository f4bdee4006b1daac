//! Database layer
//!
//! The durable store for sessions, participants, registrations and check-ins.
//! It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The database driver is selected based on configuration.
//!
//! # Architecture
//!
//! The database layer uses a trait-based abstraction (`DatabasePool`) that
//! allows the application to work with either SQLite or MySQL without
//! knowing the specific backend. Every statement issued by the repositories
//! is a single statement valid on both engines, so the counter updates stay
//! atomic per row regardless of the backend.
//!
//! # Usage
//!
//! ```ignore
//! use rollcall::config::DatabaseConfig;
//! use rollcall::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

/// Evaluate `$body` with `$p` bound to the concrete sqlx pool behind a
/// [`DatabasePool`].
///
/// The body is compiled once per driver, so it may only use statements and
/// row types valid on both SQLite and MySQL. The enclosing function must
/// return `anyhow::Result`.
macro_rules! with_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $p = $pool
                    .as_sqlite()
                    .ok_or_else(|| ::anyhow::anyhow!("SQLite driver without a SQLite pool"))?;
                $body
            }
            $crate::config::DatabaseDriver::Mysql => {
                let $p = $pool
                    .as_mysql()
                    .ok_or_else(|| ::anyhow::anyhow!("MySQL driver without a MySQL pool"))?;
                $body
            }
        }
    };
}

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_file_test_pool, create_pool, create_test_pool, DatabasePool, DynDatabasePool,
    MysqlDatabase, SqliteDatabase,
};

/// Comma separated `?` placeholders for an `IN (...)` clause
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
