//! Database schema migrations.
//!
//! Applies the initial schema: the projects, notes and occurrences tables
//! plus the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use provenance_core::error::ProvenanceError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ProvenanceError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ProvenanceError::Internal(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            ProvenanceError::Internal(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Every table keys its rows by an AUTOINCREMENT marker, which SQLite never
/// reuses even after deletes; list order and page boundaries depend on that.
/// Entity content lives whole in the `data` JSON column.
fn apply_v1(conn: &Connection) -> Result<(), ProvenanceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS projects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id  TEXT NOT NULL UNIQUE,
            data        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id  TEXT NOT NULL,
            note_id     TEXT NOT NULL,
            data        TEXT NOT NULL,
            UNIQUE (project_id, note_id)
        );

        CREATE TABLE IF NOT EXISTS occurrences (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      TEXT NOT NULL,
            occurrence_id   TEXT NOT NULL,
            note_project_id TEXT NOT NULL,
            note_id         TEXT NOT NULL,
            data            TEXT NOT NULL,
            UNIQUE (project_id, occurrence_id)
        );

        CREATE INDEX IF NOT EXISTS idx_occurrences_note
            ON occurrences (note_project_id, note_id, id);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ProvenanceError::Internal(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> i64 {
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(version(&conn), 1);

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_markers_are_not_reused_after_delete() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO notes (project_id, note_id, data) VALUES ('p', 'a', '{}')",
            [],
        )
        .unwrap();
        let first = conn.last_insert_rowid();
        conn.execute("DELETE FROM notes WHERE id = ?1", [first]).unwrap();
        conn.execute(
            "INSERT INTO notes (project_id, note_id, data) VALUES ('p', 'b', '{}')",
            [],
        )
        .unwrap();
        assert!(conn.last_insert_rowid() > first);
    }
}
