//! Versioned schema migrations.
//!
//! Migrations are applied idempotently at open, in ascending order, with
//! the applied version recorded in a `schema_version` bookkeeping table.

use crate::error::StoreResult;
use rusqlite::Connection;

/// One SQL batch per schema version, index 0 = version 1.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    "CREATE TABLE admins (
        id TEXT PRIMARY KEY,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE families (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        notes TEXT,
        created_at INTEGER NOT NULL,
        archived INTEGER DEFAULT 0
    );

    CREATE TABLE access_links (
        token TEXT PRIMARY KEY,
        family_id TEXT NOT NULL REFERENCES families(id),
        label TEXT,
        expires_at INTEGER,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE admin_sessions (
        token TEXT PRIMARY KEY,
        admin_id TEXT NOT NULL REFERENCES admins(id),
        expires_at INTEGER NOT NULL
    );

    CREATE TABLE entries (
        id TEXT PRIMARY KEY,
        family_id TEXT NOT NULL REFERENCES families(id),
        ts INTEGER NOT NULL,
        type TEXT NOT NULL,
        value TEXT NOT NULL,
        deleted INTEGER DEFAULT 0,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE configs (
        family_id TEXT PRIMARY KEY REFERENCES families(id),
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_entries_family ON entries(family_id);
    CREATE INDEX idx_entries_updated ON entries(family_id, updated_at);
    CREATE INDEX idx_entries_ts ON entries(family_id, ts);",
    // v2: per-family sequence numbers for cursor-based sync
    "ALTER TABLE families ADD COLUMN seq INTEGER NOT NULL DEFAULT 0;
    ALTER TABLE entries ADD COLUMN seq INTEGER NOT NULL DEFAULT 0;
    CREATE INDEX idx_entries_seq ON entries(family_id, seq);",
];

/// Applies any migrations newer than the recorded schema version.
pub(crate) fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )?;

    let current: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })?;

    for (i, batch) in MIGRATIONS.iter().enumerate() {
        let version = i as i64 + 1;
        if version <= current {
            continue;
        }

        conn.execute_batch(batch)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}
