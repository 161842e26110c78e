// nofx-store-sql/src/schema.rs
// ============================================================================
// Module: Schema
// Description: Table DDL and the schema-version gate (§4.A.1).
// ============================================================================

//! The store keeps a single-row `schema_meta` table recording the schema
//! version it was created (or last migrated) at. `init_schema` is the only
//! place that branches on that version: every other query assumes the
//! current shape. This is the "detect at schema-init time, not per-write"
//! reading of the `ended_at`/`completed_at` fallback note — a hypothetical
//! version 0 database (the one predating this driver, which had only a
//! `completed_at` column) is migrated once, here, rather than probed for on
//! every `updateRun`/`updateStep`.

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::SqlStoreError;

/// Current schema version this driver writes and reads.
pub const SCHEMA_VERSION: i64 = 1;

/// Filename a staged/restored backup directory holds its database file under
/// (§4.I), independent of the live database's own path.
pub const DB_FILE_NAME: &str = "data.sqlite3";

/// Opens (creating if missing) the schema at [`SCHEMA_VERSION`], migrating a
/// version 0 database forward first.
///
/// # Errors
///
/// Returns [`SqlStoreError`] on any `SQLite` failure, or
/// [`SqlStoreError::SchemaVersion`] if the database is newer than this driver
/// understands.
pub fn init_schema(conn: &mut Connection) -> Result<(), SqlStoreError> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    let tx = conn.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM schema_meta LIMIT 1", params![], |row| row.get(0)).optional()?;

    match version {
        None => {
            create_v1_tables(&tx)?;
            tx.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        }
        Some(0) => {
            migrate_v0_to_v1(&tx)?;
            tx.execute("UPDATE schema_meta SET version = ?1", params![SCHEMA_VERSION])?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => return Err(SqlStoreError::SchemaVersion(v)),
    }
    tx.commit()?;
    Ok(())
}

fn create_v1_tables(tx: &rusqlite::Transaction<'_>) -> Result<(), SqlStoreError> {
    tx.execute_batch(
        "CREATE TABLE runs (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            status TEXT NOT NULL,
            plan_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            ended_at TEXT,
            title TEXT,
            metadata_json TEXT
        );
        CREATE INDEX idx_runs_project ON runs(project_id);

        CREATE TABLE steps (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            tool TEXT NOT NULL,
            inputs_json TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT,
            outputs_json TEXT,
            idempotency_key TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            plan_order INTEGER NOT NULL
        );
        CREATE INDEX idx_steps_run ON steps(run_id);

        CREATE TABLE events (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            step_id TEXT,
            event_type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_events_run_order ON events(run_id, created_at, id);

        CREATE TABLE gates (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            gate_type TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (run_id, gate_type)
        );

        CREATE TABLE artifacts (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            step_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            location TEXT NOT NULL,
            data BLOB NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE inbox (
            key TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        CREATE TABLE outbox (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            sent_at TEXT
        );
        CREATE INDEX idx_outbox_unsent ON outbox(sent_at, created_at);",
    )?;
    Ok(())
}

/// Migrates the driver's own version 0 shape (`completed_at` instead of
/// `ended_at` on `runs`/`steps`) forward. No writer in this codebase ever
/// produces a version 0 database; this exists so the fallback the design
/// notes describe has a concrete landing place rather than a per-write probe.
fn migrate_v0_to_v1(tx: &rusqlite::Transaction<'_>) -> Result<(), SqlStoreError> {
    tx.execute_batch(
        "ALTER TABLE runs RENAME COLUMN completed_at TO ended_at;
         ALTER TABLE steps RENAME COLUMN completed_at TO ended_at;",
    )?;
    Ok(())
}
