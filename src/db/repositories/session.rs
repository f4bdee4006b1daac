//! Session repository
//!
//! Database operations for sessions, including the conditional writes used by
//! capacity admission and the lifecycle scheduler.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Every counter and status mutation here is a single `UPDATE ... WHERE`
//! statement. The database applies it atomically per row, and the affected
//! row count tells the caller whether its precondition still held.

use crate::db::DynDatabasePool;
use crate::models::{Session, SessionStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const SESSION_COLUMNS: &str = "id, name, capacity, capacity_enforced, check_ins_count, status, is_open, \
     start_time, end_time, auto_open_minutes_before, auto_end_grace_minutes, late_threshold_minutes, \
     requires_registration, counter_updated_at, created_at, updated_at";

/// A session whose stored counter disagrees with its live check-ins
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CounterDrift {
    pub session_id: String,
    pub stored: i64,
    pub actual: i64,
    pub counter_updated_at: DateTime<Utc>,
}

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// List sessions in any of the given statuses
    async fn list_by_status(&self, statuses: &[SessionStatus]) -> Result<Vec<Session>>;

    /// Move a session to `next` only if it is still in `expected`
    ///
    /// Returns true if this call performed the transition.
    async fn transition_status(
        &self,
        id: &str,
        expected: SessionStatus,
        next: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Write a status unconditionally. Returns false if the session is missing.
    async fn set_status(&self, id: &str, status: SessionStatus, now: DateTime<Utc>) -> Result<bool>;

    /// Increment `check_ins_count` if the session has room
    ///
    /// Returns false when an enforced capacity is already reached.
    async fn try_increment_count(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Decrement `check_ins_count`, never below zero
    async fn decrement_count(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Current stored counter
    async fn get_count(&self, id: &str) -> Result<Option<i64>>;

    /// Sessions whose counter differs from the number of live check-ins
    async fn list_counter_drift(&self) -> Result<Vec<CounterDrift>>;

    /// Overwrite the counter if it still holds `expected`
    async fn compare_and_set_count(
        &self,
        id: &str,
        expected: i64,
        value: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: String,
    capacity: Option<i64>,
    capacity_enforced: bool,
    check_ins_count: i64,
    status: String,
    is_open: bool,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    auto_open_minutes_before: Option<i64>,
    auto_end_grace_minutes: Option<i64>,
    late_threshold_minutes: Option<i64>,
    requires_registration: bool,
    counter_updated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        let status = row
            .status
            .parse::<SessionStatus>()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Corrupt status for session {}", row.id))?;

        Ok(Session {
            id: row.id,
            name: row.name,
            capacity: row.capacity,
            capacity_enforced: row.capacity_enforced,
            check_ins_count: row.check_ins_count,
            status,
            is_open: row.is_open,
            start_time: row.start_time,
            end_time: row.end_time,
            auto_open_minutes_before: row.auto_open_minutes_before,
            auto_end_grace_minutes: row.auto_end_grace_minutes,
            late_threshold_minutes: row.late_threshold_minutes,
            requires_registration: row.requires_registration,
            counter_updated_at: row.counter_updated_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "INSERT INTO sessions (id, name, capacity, capacity_enforced, check_ins_count, status, is_open, \
                 start_time, end_time, auto_open_minutes_before, auto_end_grace_minutes, late_threshold_minutes, \
                 requires_registration, counter_updated_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&session.id)
            .bind(&session.name)
            .bind(session.capacity)
            .bind(session.capacity_enforced)
            .bind(session.check_ins_count)
            .bind(session.status.as_str())
            .bind(session.status.is_open())
            .bind(session.start_time)
            .bind(session.end_time)
            .bind(session.auto_open_minutes_before)
            .bind(session.auto_end_grace_minutes)
            .bind(session.late_threshold_minutes)
            .bind(session.requires_registration)
            .bind(session.counter_updated_at)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(p)
            .await
            .context("Failed to create session")?;
        });

        self.get_by_id(&session.id)
            .await?
            .context("Session not found after insert")
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        let row: Option<SessionRow> = with_pool!(self.pool, |p| {
            sqlx::query_as(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get session by id")?
        });

        row.map(Session::try_from).transpose()
    }

    async fn list_by_status(&self, statuses: &[SessionStatus]) -> Result<Vec<Session>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM sessions WHERE status IN ({}) ORDER BY start_time",
            SESSION_COLUMNS,
            crate::db::placeholders(statuses.len())
        );
        let rows: Vec<SessionRow> = with_pool!(self.pool, |p| {
            let mut query = sqlx::query_as(&sql);
            for status in statuses {
                query = query.bind(status.as_str());
            }
            query.fetch_all(p).await.context("Failed to list sessions by status")?
        });

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn transition_status(
        &self,
        id: &str,
        expected: SessionStatus,
        next: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE sessions SET status = ?, is_open = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(next.as_str())
            .bind(next.is_open())
            .bind(now)
            .bind(id)
            .bind(expected.as_str())
            .execute(p)
            .await
            .context("Failed to transition session status")?
            .rows_affected()
        });

        Ok(affected == 1)
    }

    async fn set_status(&self, id: &str, status: SessionStatus, now: DateTime<Utc>) -> Result<bool> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query("UPDATE sessions SET status = ?, is_open = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(status.is_open())
                .bind(now)
                .bind(id)
                .execute(p)
                .await
                .context("Failed to set session status")?
                .rows_affected()
        });

        Ok(affected > 0)
    }

    async fn try_increment_count(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE sessions SET check_ins_count = check_ins_count + 1, counter_updated_at = ? \
                 WHERE id = ? AND (capacity_enforced = 0 OR capacity IS NULL OR capacity <= 0 \
                 OR check_ins_count < capacity)",
            )
            .bind(now)
            .bind(id)
            .execute(p)
            .await
            .context("Failed to increment check-in counter")?
            .rows_affected()
        });

        Ok(affected == 1)
    }

    async fn decrement_count(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE sessions SET check_ins_count = check_ins_count - 1, counter_updated_at = ? \
                 WHERE id = ? AND check_ins_count > 0",
            )
            .bind(now)
            .bind(id)
            .execute(p)
            .await
            .context("Failed to decrement check-in counter")?
            .rows_affected()
        });

        Ok(affected == 1)
    }

    async fn get_count(&self, id: &str) -> Result<Option<i64>> {
        let count: Option<i64> = with_pool!(self.pool, |p| {
            sqlx::query_scalar("SELECT check_ins_count FROM sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to read check-in counter")?
        });

        Ok(count)
    }

    async fn list_counter_drift(&self) -> Result<Vec<CounterDrift>> {
        let drift: Vec<CounterDrift> = with_pool!(self.pool, |p| {
            sqlx::query_as(
                "SELECT s.id AS session_id, s.check_ins_count AS stored, COUNT(c.id) AS actual, \
                 s.counter_updated_at AS counter_updated_at \
                 FROM sessions s LEFT JOIN check_ins c ON c.session_id = s.id \
                 GROUP BY s.id, s.check_ins_count, s.counter_updated_at \
                 HAVING s.check_ins_count <> COUNT(c.id)",
            )
            .fetch_all(p)
            .await
            .context("Failed to list counter drift")?
        });

        Ok(drift)
    }

    async fn compare_and_set_count(
        &self,
        id: &str,
        expected: i64,
        value: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE sessions SET check_ins_count = ?, counter_updated_at = ? \
                 WHERE id = ? AND check_ins_count = ?",
            )
            .bind(value)
            .bind(now)
            .bind(id)
            .bind(expected)
            .execute(p)
            .await
            .context("Failed to overwrite check-in counter")?
            .rows_affected()
        });

        Ok(affected == 1)
    }
}
