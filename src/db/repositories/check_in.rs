//! Check-in repository
//!
//! Check-in rows are inserted only by the admission path. The
//! `(participant_id, session_id)` unique key is what turns a concurrent
//! duplicate check-in into a constraint violation.

use crate::db::DynDatabasePool;
use crate::models::{CheckIn, CheckInMethod, SessionStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

const CHECK_IN_COLUMNS: &str = "id, participant_id, session_id, method, check_in_time, is_late, created_at";

/// Check-in repository trait
#[async_trait]
pub trait CheckInRepository: Send + Sync {
    /// Insert a check-in
    ///
    /// A duplicate participant/session pair fails with a unique violation,
    /// see [`super::is_unique_violation`].
    async fn create(&self, check_in: &CheckIn) -> Result<()>;

    /// Get check-in by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<CheckIn>>;

    /// Find the check-in of a participant for a session
    async fn find(&self, participant_id: &str, session_id: &str) -> Result<Option<CheckIn>>;

    /// Delete a check-in. Returns true if this call removed the row.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// All check-ins of a session, oldest first
    async fn list_by_session(&self, session_id: &str) -> Result<Vec<CheckIn>>;

    /// Live check-in counts for several sessions in one query
    ///
    /// Sessions without check-ins are absent from the map.
    async fn count_by_sessions(&self, session_ids: &[String]) -> Result<HashMap<String, i64>>;

    /// Aggregate statistics for a session
    async fn stats(&self, session_id: &str) -> Result<SessionStats>;
}

/// SQLx-based check-in repository implementation
pub struct SqlxCheckInRepository {
    pool: DynDatabasePool,
}

impl SqlxCheckInRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CheckInRepository> {
        Arc::new(Self::new(pool))
    }
}

#[derive(sqlx::FromRow)]
struct CheckInRow {
    id: String,
    participant_id: String,
    session_id: String,
    method: String,
    check_in_time: DateTime<Utc>,
    is_late: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<CheckInRow> for CheckIn {
    type Error = anyhow::Error;

    fn try_from(row: CheckInRow) -> Result<Self> {
        let method = row
            .method
            .parse::<CheckInMethod>()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Corrupt method for check-in {}", row.id))?;

        Ok(CheckIn {
            id: row.id,
            participant_id: row.participant_id,
            session_id: row.session_id,
            method,
            check_in_time: row.check_in_time,
            is_late: row.is_late,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl CheckInRepository for SqlxCheckInRepository {
    async fn create(&self, check_in: &CheckIn) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "INSERT INTO check_ins (id, participant_id, session_id, method, check_in_time, is_late, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&check_in.id)
            .bind(&check_in.participant_id)
            .bind(&check_in.session_id)
            .bind(check_in.method.as_str())
            .bind(check_in.check_in_time)
            .bind(check_in.is_late)
            .bind(check_in.created_at)
            .execute(p)
            .await
            .context("Failed to create check-in")?;
        });

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CheckIn>> {
        let sql = format!("SELECT {} FROM check_ins WHERE id = ?", CHECK_IN_COLUMNS);
        let row: Option<CheckInRow> = with_pool!(self.pool, |p| {
            sqlx::query_as(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get check-in by id")?
        });

        row.map(CheckIn::try_from).transpose()
    }

    async fn find(&self, participant_id: &str, session_id: &str) -> Result<Option<CheckIn>> {
        let sql = format!(
            "SELECT {} FROM check_ins WHERE participant_id = ? AND session_id = ?",
            CHECK_IN_COLUMNS
        );
        let row: Option<CheckInRow> = with_pool!(self.pool, |p| {
            sqlx::query_as(&sql)
                .bind(participant_id)
                .bind(session_id)
                .fetch_optional(p)
                .await
                .context("Failed to find check-in")?
        });

        row.map(CheckIn::try_from).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let affected = with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM check_ins WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete check-in")?
                .rows_affected()
        });

        Ok(affected == 1)
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<CheckIn>> {
        let sql = format!(
            "SELECT {} FROM check_ins WHERE session_id = ? ORDER BY check_in_time, id",
            CHECK_IN_COLUMNS
        );
        let rows: Vec<CheckInRow> = with_pool!(self.pool, |p| {
            sqlx::query_as(&sql)
                .bind(session_id)
                .fetch_all(p)
                .await
                .context("Failed to list check-ins")?
        });

        rows.into_iter().map(CheckIn::try_from).collect()
    }

    async fn count_by_sessions(&self, session_ids: &[String]) -> Result<HashMap<String, i64>> {
        if session_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT session_id, COUNT(*) FROM check_ins WHERE session_id IN ({}) GROUP BY session_id",
            crate::db::placeholders(session_ids.len())
        );
        let rows: Vec<(String, i64)> = with_pool!(self.pool, |p| {
            let mut query = sqlx::query_as(&sql);
            for id in session_ids {
                query = query.bind(id);
            }
            query.fetch_all(p).await.context("Failed to count check-ins")?
        });

        Ok(rows.into_iter().collect())
    }

    async fn stats(&self, session_id: &str) -> Result<SessionStats> {
        let groups: Vec<(String, bool, i64)> = with_pool!(self.pool, |p| {
            sqlx::query_as(
                "SELECT method, is_late, COUNT(*) FROM check_ins WHERE session_id = ? GROUP BY method, is_late",
            )
            .bind(session_id)
            .fetch_all(p)
            .await
            .context("Failed to compute check-in stats")?
        });

        let mut stats = SessionStats::default();
        for (method, late, count) in groups {
            stats.total += count;
            if late {
                stats.late += count;
            } else {
                stats.on_time += count;
            }
            match method.parse::<CheckInMethod>() {
                Ok(CheckInMethod::Qr) => stats.qr += count,
                Ok(CheckInMethod::Manual) => stats.manual += count,
                Err(e) => tracing::warn!(session_id, "Skipping check-ins with {}", e),
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::is_unique_violation;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SqlxCheckInRepository {
        let pool = create_test_pool().await.expect("Failed to create pool");
        migrations::run_migrations(&pool).await.expect("Failed to run migrations");

        let now = Utc::now();
        let sqlite = pool.as_sqlite().unwrap();
        for session in ["s1", "s2"] {
            sqlx::query(
                "INSERT INTO sessions (id, name, start_time, end_time, counter_updated_at, created_at, updated_at) \
                 VALUES (?, 'Talk', ?, ?, ?, ?, ?)",
            )
            .bind(session)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(sqlite)
            .await
            .unwrap();
        }
        for participant in ["p1", "p2", "p3"] {
            sqlx::query("INSERT INTO participants (id, name, qr_code, created_at) VALUES (?, 'Guest', ?, ?)")
                .bind(participant)
                .bind(format!("QR-{}", participant))
                .bind(now)
                .execute(sqlite)
                .await
                .unwrap();
        }

        SqlxCheckInRepository::new(pool)
    }

    fn check_in(id: &str, participant: &str, session: &str, method: CheckInMethod, late: bool) -> CheckIn {
        let now = Utc::now();
        CheckIn {
            id: id.to_string(),
            participant_id: participant.to_string(),
            session_id: session.to_string(),
            method,
            check_in_time: now,
            is_late: late,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_check_in_is_unique_violation() {
        let repo = setup().await;
        repo.create(&check_in("c1", "p1", "s1", CheckInMethod::Qr, false)).await.unwrap();

        let err = repo
            .create(&check_in("c2", "p1", "s1", CheckInMethod::Manual, false))
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let found = repo.find("p1", "s1").await.unwrap().unwrap();
        assert_eq!(found.id, "c1");
        assert_eq!(found.method, CheckInMethod::Qr);
    }

    #[tokio::test]
    async fn test_delete_reports_whether_row_was_removed() {
        let repo = setup().await;
        repo.create(&check_in("c1", "p1", "s1", CheckInMethod::Qr, false)).await.unwrap();

        assert!(repo.delete("c1").await.unwrap());
        assert!(!repo.delete("c1").await.unwrap());
        assert!(repo.get_by_id("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_by_sessions() {
        let repo = setup().await;
        repo.create(&check_in("c1", "p1", "s1", CheckInMethod::Qr, false)).await.unwrap();
        repo.create(&check_in("c2", "p2", "s1", CheckInMethod::Qr, false)).await.unwrap();
        repo.create(&check_in("c3", "p1", "s2", CheckInMethod::Qr, false)).await.unwrap();

        let counts = repo
            .count_by_sessions(&["s1".to_string(), "s2".to_string(), "none".to_string()])
            .await
            .unwrap();
        assert_eq!(counts.get("s1"), Some(&2));
        assert_eq!(counts.get("s2"), Some(&1));
        assert_eq!(counts.get("none"), None);
    }

    #[tokio::test]
    async fn test_stats() {
        let repo = setup().await;
        repo.create(&check_in("c1", "p1", "s1", CheckInMethod::Qr, false)).await.unwrap();
        repo.create(&check_in("c2", "p2", "s1", CheckInMethod::Qr, true)).await.unwrap();
        repo.create(&check_in("c3", "p3", "s1", CheckInMethod::Manual, true)).await.unwrap();

        let stats = repo.stats("s1").await.unwrap();
        assert_eq!(
            stats,
            SessionStats {
                total: 3,
                on_time: 1,
                late: 2,
                qr: 2,
                manual: 1,
            }
        );
        assert_eq!(repo.list_by_session("s1").await.unwrap().len(), 3);
    }
}
