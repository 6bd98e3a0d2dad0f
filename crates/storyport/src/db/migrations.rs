//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each migration runs at
//! most once, inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_import_jobs_table",
        sql: include_str!("sql/001_create_import_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_content_records_table",
        sql: include_str!("sql/002_create_content_records.sql"),
    },
];

/// Highest version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
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

    if current_version > latest_version() {
        return Err(DatabaseError::Migration {
            version: current_version,
            reason: format!(
                "database schema is newer than this build (knows up to v{})",
                latest_version()
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
