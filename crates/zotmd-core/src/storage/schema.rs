//! SQLite schema for the sync state store
//!
//! The schema is versioned through the `schema_info` table and upgraded by
//! applying ordered migrations. A database stamped with a version newer than
//! [`SCHEMA_VERSION`] is refused rather than guessed at.

use std::path::Path;

use rusqlite::{Connection, Result};

use super::error::{StoreError, StoreResult};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Ordered migrations; entry `(v, sql)` upgrades a database from `v - 1` to `v`
const MIGRATIONS: &[(i32, &str)] = &[
    (
        1,
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per item ever synced
        CREATE TABLE IF NOT EXISTS sync_items (
            item_key TEXT PRIMARY KEY,
            citation_key TEXT NOT NULL,
            metadata_hash TEXT NOT NULL,
            annotations_hash TEXT NOT NULL,
            file_path TEXT NOT NULL,
            library_version INTEGER NOT NULL,
            item_version INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('active', 'removed')),
            synced_at TEXT NOT NULL
        );

        -- Singleton cursor row
        CREATE TABLE IF NOT EXISTS sync_cursor (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            library_version INTEGER
        );

        INSERT OR IGNORE INTO sync_cursor (id, library_version) VALUES (1, NULL);

        CREATE INDEX IF NOT EXISTS idx_sync_items_citation_key ON sync_items(citation_key);
        "#,
    ),
    (
        2,
        r#"
        -- Previous annotation set, consumed by the annotation merger
        ALTER TABLE sync_items ADD COLUMN annotations_json TEXT NOT NULL DEFAULT '[]';

        -- Renderer identity and full sync bookkeeping
        ALTER TABLE sync_cursor ADD COLUMN template_hash TEXT;
        ALTER TABLE sync_cursor ADD COLUMN last_full_sync TEXT;

        -- A file path belongs to at most one live item
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_items_live_path
            ON sync_items(file_path) WHERE status = 'active';

        CREATE INDEX IF NOT EXISTS idx_sync_items_status ON sync_items(status);
        "#,
    ),
];

/// Bring the database up to [`SCHEMA_VERSION`]
///
/// Each migration runs in its own transaction together with the version bump.
pub fn migrate(conn: &mut Connection, path: &Path) -> StoreResult<()> {
    let current = get_schema_version(conn)?.unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(StoreError::NewerSchema {
            path: path.to_path_buf(),
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
            [version.to_string()],
        )?;
        tx.commit()?;
        tracing::debug!("Migrated state database to schema version {}", version);
    }

    Ok(())
}

/// Get the current schema version from the database
///
/// Returns `None` for a fresh database without a `schema_info` table.
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let table_exists = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")?
        .exists([])?;

    if !table_exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_migration(conn: &Connection) -> bool {
    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
