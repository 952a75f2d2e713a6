//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;
use tracing::info;

use crate::error::DbError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_videos_table",
        sql: include_str!("sql/001_create_videos.sql"),
    },
    Migration {
        version: 2,
        description: "index_videos_status",
        sql: include_str!("sql/002_index_videos_status.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        info!(
            "Running migration v{}: {}",
            migration.version, migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DbError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_schema_enforces_processed_location_invariant() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let processed_without_location = conn.execute(
            "INSERT INTO videos (video_id, status, source_location, uploaded_at, updated_at)
             VALUES ('v1', 'processed', 'src', 'now', 'now')",
            [],
        );
        assert!(processed_without_location.is_err());

        let failed_with_location = conn.execute(
            "INSERT INTO videos (video_id, status, source_location, processed_location, uploaded_at, updated_at)
             VALUES ('v2', 'failed', 'src', 'dst', 'now', 'now')",
            [],
        );
        assert!(failed_with_location.is_err());
    }

    #[test]
    fn test_schema_rejects_unknown_status() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO videos (video_id, status, source_location, uploaded_at, updated_at)
             VALUES ('v1', 'queued', 'src', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
