//! Database migrations module
//!
//! Code-based migrations embedded in the binary, with SQL for both SQLite and
//! MySQL.
//!
//! # Usage
//!
//! ```ignore
//! use rollcall::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! Each migration is defined as a `Migration` struct containing:
//! - `version`: Unique version number for ordering
//! - `name`: Human-readable migration name
//! - `up_sqlite`: SQL for SQLite database
//! - `up_mysql`: SQL for MySQL database

use anyhow::{Context, Result};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// All migrations, applied in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(36) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                capacity INTEGER,
                capacity_enforced BOOLEAN NOT NULL DEFAULT 1,
                check_ins_count INTEGER NOT NULL DEFAULT 0,
                status VARCHAR(16) NOT NULL DEFAULT 'SCHEDULED',
                is_open BOOLEAN NOT NULL DEFAULT 0,
                start_time TIMESTAMP NOT NULL,
                end_time TIMESTAMP NOT NULL,
                auto_open_minutes_before INTEGER,
                auto_end_grace_minutes INTEGER,
                late_threshold_minutes INTEGER,
                requires_registration BOOLEAN NOT NULL DEFAULT 0,
                counter_updated_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(36) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                capacity BIGINT NULL,
                capacity_enforced BOOLEAN NOT NULL DEFAULT TRUE,
                check_ins_count BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(16) NOT NULL DEFAULT 'SCHEDULED',
                is_open BOOLEAN NOT NULL DEFAULT FALSE,
                start_time DATETIME(6) NOT NULL,
                end_time DATETIME(6) NOT NULL,
                auto_open_minutes_before BIGINT NULL,
                auto_end_grace_minutes BIGINT NULL,
                late_threshold_minutes BIGINT NULL,
                requires_registration BOOLEAN NOT NULL DEFAULT FALSE,
                counter_updated_at DATETIME(6) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL
            );
            CREATE INDEX idx_sessions_status ON sessions(status);
        "#,
    },
    Migration {
        version: 2,
        name: "create_participants",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS participants (
                id VARCHAR(36) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                email VARCHAR(255),
                qr_code VARCHAR(128) NOT NULL UNIQUE,
                created_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS participants (
                id VARCHAR(36) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                email VARCHAR(255) NULL,
                qr_code VARCHAR(128) NOT NULL UNIQUE,
                created_at DATETIME(6) NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_registrations",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS registrations (
                participant_id VARCHAR(36) NOT NULL,
                session_id VARCHAR(36) NOT NULL,
                created_at TIMESTAMP NOT NULL,
                PRIMARY KEY (participant_id, session_id),
                FOREIGN KEY (participant_id) REFERENCES participants(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS registrations (
                participant_id VARCHAR(36) NOT NULL,
                session_id VARCHAR(36) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                PRIMARY KEY (participant_id, session_id),
                FOREIGN KEY (participant_id) REFERENCES participants(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 4,
        name: "create_check_ins",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS check_ins (
                id VARCHAR(36) PRIMARY KEY,
                participant_id VARCHAR(36) NOT NULL,
                session_id VARCHAR(36) NOT NULL,
                method VARCHAR(16) NOT NULL,
                check_in_time TIMESTAMP NOT NULL,
                is_late BOOLEAN NOT NULL,
                created_at TIMESTAMP NOT NULL,
                UNIQUE (participant_id, session_id),
                FOREIGN KEY (participant_id) REFERENCES participants(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_check_ins_session_id ON check_ins(session_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS check_ins (
                id VARCHAR(36) PRIMARY KEY,
                participant_id VARCHAR(36) NOT NULL,
                session_id VARCHAR(36) NOT NULL,
                method VARCHAR(16) NOT NULL,
                check_in_time DATETIME(6) NOT NULL,
                is_late BOOLEAN NOT NULL,
                created_at DATETIME(6) NOT NULL,
                UNIQUE KEY uq_check_ins_participant_session (participant_id, session_id),
                FOREIGN KEY (participant_id) REFERENCES participants(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_check_ins_session_id ON check_ins(session_id);
        "#,
    },
];

/// Run all pending migrations
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied_versions = get_applied_versions(pool).await?;

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

/// Versions of the migrations already applied, in order
async fn get_applied_versions(pool: &DynDatabasePool) -> Result<Vec<i32>> {
    let versions: Vec<i64> = with_pool!(pool, |p| {
        sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
            .fetch_all(p)
            .await
            .context("Failed to read applied migrations")?
    });

    versions
        .into_iter()
        .map(|v| i32::try_from(v).context("Migration version out of range"))
        .collect()
}

/// Apply a single migration
async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => migration.up_sqlite,
        DatabaseDriver::Mysql => migration.up_mysql,
    };

    for statement in split_sql_statements(sql) {
        pool.execute(statement)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    with_pool!(pool, |p| {
        sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(p)
            .await
            .context("Failed to record migration")?;
    });

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_versions(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use chrono::Utc;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        // Running again should apply 0 migrations
        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let pending = pending_count(&pool).await.expect("Failed to check");
        assert_eq!(pending, MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");
        let pending = pending_count(&pool).await.expect("Failed to check");
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_check_ins_unique_per_participant_and_session() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        let sqlite_pool = pool.as_sqlite().unwrap();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO sessions (id, name, start_time, end_time, counter_updated_at, created_at, updated_at) \
             VALUES ('s1', 'Keynote', ?, ?, ?, ?, ?)",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(sqlite_pool)
        .await
        .expect("Failed to create session");

        sqlx::query("INSERT INTO participants (id, name, qr_code, created_at) VALUES ('p1', 'Ada', 'QR-1', ?)")
            .bind(now)
            .execute(sqlite_pool)
            .await
            .expect("Failed to create participant");

        let insert = "INSERT INTO check_ins (id, participant_id, session_id, method, check_in_time, is_late, created_at) \
                      VALUES (?, 'p1', 's1', 'qr', ?, 0, ?)";
        sqlx::query(insert)
            .bind("c1")
            .bind(now)
            .bind(now)
            .execute(sqlite_pool)
            .await
            .expect("First check-in should insert");

        let duplicate = sqlx::query(insert)
            .bind("c2")
            .bind(now)
            .bind(now)
            .execute(sqlite_pool)
            .await;

        match duplicate {
            Err(sqlx::Error::Database(e)) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other),
        }
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT);\n-- comment only\n;\nCREATE INDEX i ON a(id);";
        let statements = split_sql_statements(sql);
        assert_eq!(statements, vec!["CREATE TABLE a (id INT)", "CREATE INDEX i ON a(id)"]);
    }

    #[test]
    fn test_truncate_sql() {
        let long = "x".repeat(150);
        assert_eq!(truncate_sql(&long).len(), 103);
        assert_eq!(truncate_sql("short"), "short");
    }
}
