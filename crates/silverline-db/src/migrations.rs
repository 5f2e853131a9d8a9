//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time. They run sequentially
//! on startup, tracked by the `_silverline_migrations` table. Each migration
//! runs exactly once, inside its own transaction.

use rusqlite::Connection;
use std::collections::HashSet;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_subscribers",
        sql: include_str!("migrations/001_subscribers.sql"),
    },
    Migration {
        name: "002_pending_signups",
        sql: include_str!("migrations/002_pending_signups.sql"),
    },
    Migration {
        name: "003_call_sessions",
        sql: include_str!("migrations/003_call_sessions.sql"),
    },
    Migration {
        name: "004_voice_auth_attempts",
        sql: include_str!("migrations/004_voice_auth_attempts.sql"),
    },
    Migration {
        name: "005_knowledge_base",
        sql: include_str!("migrations/005_knowledge_base.sql"),
    },
    Migration {
        name: "006_call_event_log",
        sql: include_str!("migrations/006_call_event_log.sql"),
    },
    Migration {
        name: "007_webhook_deliveries",
        sql: include_str!("migrations/007_webhook_deliveries.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs all pending migrations against the given connection.
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _silverline_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM _silverline_migrations")?;
    let names = stmt.query_map([], |row| row.get(0))?;
    names.collect()
}

/// Applies one migration and its tracking row atomically.
fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _silverline_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(|source| MigrationError::ExecutionFailed {
            name: "_silverline_migrations_bootstrap".to_string(),
            source,
        })?;
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;

    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !done.contains(m.name))
        .collect();
    if pending.is_empty() {
        tracing::debug!(known = done.len(), "schema is up to date");
        return Ok(0);
    }

    for migration in &pending {
        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn run_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM _silverline_migrations", [], |row| {
                row.get(0)
            })
            .expect("should query migration count");
        assert_eq!(count, MIGRATIONS.len());
    }

    #[test]
    fn run_migrations_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&conn).expect("first run should succeed");
        assert_eq!(first, MIGRATIONS.len());

        let second = run_migrations(&conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");
    }

    #[test]
    fn persisted_tables_exist() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");

        for table in [
            "call_sessions",
            "call_transcripts",
            "ai_responses",
            "sentiment_analysis",
            "voice_auth_attempts",
            "subscribers",
            "pending_signups",
            "knowledge_base",
            "call_event_log",
            "webhook_deliveries",
        ] {
            assert!(table_exists(&conn, table), "{table} table should exist");
        }
    }

    #[test]
    fn sentiment_rows_must_flag_escalation_for_high_urgency() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");

        conn.execute(
            "INSERT INTO call_sessions (call_sid, phone_number) VALUES ('CA1', '+15550000001')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO call_transcripts (session_id, speaker, text) VALUES (1, 'caller', 'help')",
            [],
        )
        .unwrap();

        let rejected = conn.execute(
            "INSERT INTO sentiment_analysis
                (session_id, transcript_id, sentiment, score, urgency, emotion,
                 escalation_recommended, source)
             VALUES (1, 1, 'neutral', 0.0, 5, 'neutral', 0, 'model')",
            [],
        );
        assert!(rejected.is_err(), "urgency 5 without escalation must fail");

        conn.execute(
            "INSERT INTO sentiment_analysis
                (session_id, transcript_id, sentiment, score, urgency, emotion,
                 escalation_recommended, source)
             VALUES (1, 1, 'neutral', 0.0, 5, 'neutral', 1, 'model')",
            [],
        )
        .expect("flagged row should insert");
    }

    #[test]
    fn migration_side_effects_rollback_when_tracking_insert_fails() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let migrations = [Migration {
            name: "001_tracking_insert_conflict",
            sql: "
                CREATE TABLE rollback_probe (id INTEGER PRIMARY KEY);
                INSERT INTO _silverline_migrations (name) VALUES ('001_tracking_insert_conflict');
            ",
        }];

        let err = run_migrations_from_list(&conn, &migrations)
            .expect_err("tracking insert conflict should fail migration");

        match err {
            MigrationError::ExecutionFailed { name, .. } => {
                assert_eq!(name, "001_tracking_insert_conflict")
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        assert!(
            !table_exists(&conn, "rollback_probe"),
            "schema side effects should be rolled back when tracking insert fails"
        );
    }
}
