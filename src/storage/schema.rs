//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the catalog database.

use crate::storage::StoreError;

/// Schema version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 2;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per discovered post
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_url TEXT NOT NULL UNIQUE,
    page INTEGER,
    title TEXT,
    description TEXT,
    external_url TEXT,
    resolved_id TEXT,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    download_path TEXT,
    discovered_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((resolved_id IS NOT NULL) = (status IN ('resolved', 'downloading', 'downloaded')))
);

CREATE INDEX IF NOT EXISTS idx_entries_status_updated ON entries(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_entries_page ON entries(page);

-- Index page walk progress (single row)
CREATE TABLE IF NOT EXISTS crawl_cursor (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    start_page INTEGER NOT NULL,
    end_page INTEGER NOT NULL,
    last_completed INTEGER,
    updated_at TEXT NOT NULL
);

-- Index pages whose fetch exhausted its retries
CREATE TABLE IF NOT EXISTS failed_pages (
    page INTEGER PRIMARY KEY,
    last_error TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

-- Track pipeline runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    stage TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// Refuses to open a catalog written by a newer schema version.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), StoreError> {
    let found = get_schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::IncompatibleSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    if found == 1 {
        // Version 1 catalogs predate post descriptions
        conn.execute_batch("ALTER TABLE entries ADD COLUMN description TEXT;")?;
    }

    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Reads the schema version recorded in the database
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<u32, rusqlite::Error> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}
