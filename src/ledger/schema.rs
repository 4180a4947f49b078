//! SQLite DDL definitions for the chore ledger.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL for the ledger database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads during writes.
PRAGMA journal_mode = WAL;

-- Enforce foreign key constraints.
PRAGMA foreign_keys = ON;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    username        TEXT UNIQUE NOT NULL,
    credential_hash TEXT NOT NULL DEFAULT '',
    email           TEXT NOT NULL,
    role            TEXT NOT NULL CHECK (role IN ('parent', 'child')),
    points          INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chores (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT UNIQUE NOT NULL,
    points          INTEGER NOT NULL CHECK (points > 0),
    default_user_id INTEGER REFERENCES users(id)
);

-- One row per (chore, date). `date` is always `YYYY-MM-DD`.
CREATE TABLE IF NOT EXISTS daily_chores (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER REFERENCES users(id),
    chore_id     INTEGER NOT NULL REFERENCES chores(id),
    date         TEXT NOT NULL,
    completed    INTEGER NOT NULL DEFAULT 0,
    completed_by INTEGER REFERENCES users(id),
    UNIQUE (chore_id, date)
);

CREATE INDEX IF NOT EXISTS idx_daily_chores_date ON daily_chores(date);

-- Points journal: every balance mutation, written in the same transaction.
CREATE TABLE IF NOT EXISTS point_events (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id  INTEGER NOT NULL REFERENCES users(id),
    chore_id INTEGER REFERENCES chores(id),
    date     TEXT,
    delta    INTEGER NOT NULL,
    reason   TEXT NOT NULL,      -- credit | debit | reset
    at       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_point_events_user ON point_events(user_id, id);

-- Fired scheduler boundaries, keyed `<trigger>:<YYYY-MM-DD>`.
CREATE TABLE IF NOT EXISTS scheduler_runs (
    run_key     TEXT PRIMARY KEY,
    recorded_at INTEGER NOT NULL DEFAULT 0
);
"#;

/// Tables in dependency order (children last).
const TABLES: &[&str] = &[
    "schema_meta",
    "users",
    "chores",
    "daily_chores",
    "point_events",
    "scheduler_runs",
];

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times: every statement uses `IF NOT EXISTS`.
/// Inserts the current schema version into `schema_meta` if not already
/// present.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Drop every ledger table. Used by the seeding CLI's `--reset`.
pub(crate) fn drop_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    for table in TABLES.iter().rev() {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Read the current schema version from the database.
///
/// Returns `None` if the `schema_meta` table is empty or the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
