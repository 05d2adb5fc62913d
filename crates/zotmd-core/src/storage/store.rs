//! Sync state store
//!
//! Persists one [`SyncStateRecord`] per synced item plus the singleton
//! library cursor. Every mutation is its own transaction, so an interrupted
//! run leaves exactly the records of fully reconciled items behind.
//!
//! ## Tables
//!
//! - `sync_items` - One row per item key (live or removed)
//! - `sync_cursor` - Library cursor, renderer fingerprint, last full sync
//! - `schema_info` - Schema version

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::error::{StoreError, StoreResult};
use super::schema::migrate;
use crate::models::{RecordStatus, RemoteAnnotation, SyncStateRecord};

const RECORD_COLUMNS: &str = "item_key, citation_key, metadata_hash, annotations_hash, file_path, \
     library_version, item_version, status, annotations_json, synced_at";

/// Summary statistics over the store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub active_items: i64,
    pub removed_items: i64,
    pub total_annotations: i64,
    pub library_version: Option<i64>,
    pub last_full_sync: Option<DateTime<Utc>>,
}

/// SQLite-backed store of per-item sync state
pub struct SyncStateStore {
    conn: Connection,
    path: PathBuf,
    mutations: u64,
}

impl SyncStateStore {
    /// Open or create the state database
    ///
    /// Fails with a corruption-class error (see [`StoreError::is_corruption`])
    /// when the file is not a database, fails its integrity check, or was
    /// written by a newer schema. Nothing is modified in that case.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init(conn, path.to_path_buf())
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(mut conn: Connection, path: PathBuf) -> StoreResult<Self> {
        check_integrity(&conn, &path)?;
        migrate(&mut conn, &path).map_err(|e| match e {
            StoreError::Database(err) if is_corrupt_sqlite(&err) => StoreError::Corrupt {
                path: path.clone(),
                details: err.to_string(),
            },
            other => other,
        })?;

        Ok(Self {
            conn,
            path,
            mutations: 0,
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of mutating statements committed through this handle
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    // ==================== Records ====================

    /// Get the record for an item, live or removed
    pub fn get(&self, item_key: &str) -> StoreResult<Option<SyncStateRecord>> {
        let sql = format!("SELECT {} FROM sync_items WHERE item_key = ?", RECORD_COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, params![item_key], RecordRow::from_row)
            .optional()?;
        raw.map(RecordRow::into_record).transpose()
    }

    /// Insert or replace the record for an item
    ///
    /// A live record may not claim a file path owned by another live record.
    pub fn put(&mut self, record: &SyncStateRecord) -> StoreResult<()> {
        let annotations_json = serde_json::to_string(&record.annotations)?;

        let tx = self.conn.transaction()?;

        if record.is_live() {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT item_key FROM sync_items WHERE file_path = ? AND status = 'active' AND item_key != ?",
                    params![record.file_path, record.item_key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = owner {
                return Err(StoreError::PathConflict {
                    file_path: record.file_path.clone(),
                    owner,
                });
            }
        }

        tx.execute(
            r#"
            INSERT INTO sync_items (
                item_key, citation_key, metadata_hash, annotations_hash, file_path,
                library_version, item_version, status, annotations_json, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(item_key) DO UPDATE SET
                citation_key = excluded.citation_key,
                metadata_hash = excluded.metadata_hash,
                annotations_hash = excluded.annotations_hash,
                file_path = excluded.file_path,
                library_version = excluded.library_version,
                item_version = excluded.item_version,
                status = excluded.status,
                annotations_json = excluded.annotations_json,
                synced_at = excluded.synced_at
            "#,
            params![
                record.item_key,
                record.citation_key,
                record.metadata_hash,
                record.annotations_hash,
                record.file_path,
                record.library_version,
                record.item_version,
                record.status.as_str(),
                annotations_json,
                record.synced_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        self.mutations += 1;
        Ok(())
    }

    /// Flag a record as removed, keeping the row (move behavior)
    ///
    /// `quarantined_path` replaces the stored path when the file was relocated.
    /// Returns `false` if there was no live record.
    pub fn mark_removed(
        &mut self,
        item_key: &str,
        quarantined_path: Option<&str>,
    ) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE sync_items
            SET status = 'removed',
                file_path = COALESCE(?2, file_path),
                synced_at = ?3
            WHERE item_key = ?1 AND status = 'active'
            "#,
            params![item_key, quarantined_path, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        if changed > 0 {
            self.mutations += 1;
        }
        Ok(changed > 0)
    }

    /// Delete a record entirely (delete behavior)
    pub fn purge(&mut self, item_key: &str) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM sync_items WHERE item_key = ?", params![item_key])?;
        tx.commit()?;

        if changed > 0 {
            self.mutations += 1;
        }
        Ok(changed > 0)
    }

    /// All live records, ordered by item key
    pub fn all_live(&self) -> StoreResult<Vec<SyncStateRecord>> {
        self.query_records(
            "WHERE status = 'active' ORDER BY item_key",
            params![],
        )
    }

    /// The live record using a citation key, if any
    pub fn live_by_citation_key(&self, citation_key: &str) -> StoreResult<Option<SyncStateRecord>> {
        Ok(self
            .query_records(
                "WHERE citation_key = ? AND status = 'active' ORDER BY item_key LIMIT 1",
                params![citation_key],
            )?
            .pop())
    }

    /// Every record (live or removed) that ever used a citation key
    pub fn by_citation_key(&self, citation_key: &str) -> StoreResult<Vec<SyncStateRecord>> {
        self.query_records(
            "WHERE citation_key = ? ORDER BY item_key",
            params![citation_key],
        )
    }

    /// The live record owning a file path, if any
    pub fn live_by_path(&self, file_path: &str) -> StoreResult<Option<SyncStateRecord>> {
        Ok(self
            .query_records(
                "WHERE file_path = ? AND status = 'active' LIMIT 1",
                params![file_path],
            )?
            .pop())
    }

    fn query_records(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<SyncStateRecord>> {
        let sql = format!("SELECT {} FROM sync_items {}", RECORD_COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, RecordRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    // ==================== Cursor ====================

    /// Last library version fully incorporated, `None` before the first sync
    pub fn cursor(&self) -> StoreResult<Option<i64>> {
        let version = self.conn.query_row(
            "SELECT library_version FROM sync_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Advance the cursor
    ///
    /// The cursor never moves backwards; setting the current value is a no-op.
    pub fn set_cursor(&mut self, version: i64) -> StoreResult<()> {
        match self.cursor()? {
            Some(current) if current == version => return Ok(()),
            Some(current) if current > version => {
                return Err(StoreError::CursorRegression {
                    current,
                    requested: version,
                })
            }
            _ => {}
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE sync_cursor SET library_version = ? WHERE id = 1",
            params![version],
        )?;
        tx.commit()?;

        self.mutations += 1;
        Ok(())
    }

    /// Fingerprint of the renderer used for the last completed run
    pub fn template_fingerprint(&self) -> StoreResult<Option<String>> {
        let hash = self.conn.query_row(
            "SELECT template_hash FROM sync_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(hash)
    }

    /// Record the renderer fingerprint; no-op when unchanged
    pub fn set_template_fingerprint(&mut self, fingerprint: &str) -> StoreResult<()> {
        if self.template_fingerprint()?.as_deref() == Some(fingerprint) {
            return Ok(());
        }

        self.conn.execute(
            "UPDATE sync_cursor SET template_hash = ? WHERE id = 1",
            params![fingerprint],
        )?;
        self.mutations += 1;
        Ok(())
    }

    /// Record the completion time of a full sync
    pub fn record_full_sync(&mut self, at: DateTime<Utc>) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE sync_cursor SET last_full_sync = ? WHERE id = 1",
            params![at.to_rfc3339()],
        )?;
        self.mutations += 1;
        Ok(())
    }

    // ==================== Stats ====================

    /// Counts for status display
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let (active_items, removed_items): (i64, i64) = self.conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'removed' THEN 1 ELSE 0 END), 0)
            FROM sync_items
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let total_annotations = self
            .all_live()?
            .iter()
            .map(|record| record.annotations.len() as i64)
            .sum();

        let last_full_sync: Option<String> = self.conn.query_row(
            "SELECT last_full_sync FROM sync_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            active_items,
            removed_items,
            total_annotations,
            library_version: self.cursor()?,
            last_full_sync: last_full_sync
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

/// Run SQLite's quick integrity check
fn check_integrity(conn: &Connection, path: &Path) -> StoreResult<()> {
    let result: Result<String, rusqlite::Error> =
        conn.query_row("PRAGMA quick_check", [], |row| row.get(0));

    match result {
        Ok(status) if status == "ok" => Ok(()),
        Ok(status) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            details: status,
        }),
        Err(err) if is_corrupt_sqlite(&err) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            details: err.to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

fn is_corrupt_sqlite(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase)
    )
}

/// Raw row as read from SQLite, before decoding
struct RecordRow {
    item_key: String,
    citation_key: String,
    metadata_hash: String,
    annotations_hash: String,
    file_path: String,
    library_version: i64,
    item_version: i64,
    status: String,
    annotations_json: String,
    synced_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_key: row.get(0)?,
            citation_key: row.get(1)?,
            metadata_hash: row.get(2)?,
            annotations_hash: row.get(3)?,
            file_path: row.get(4)?,
            library_version: row.get(5)?,
            item_version: row.get(6)?,
            status: row.get(7)?,
            annotations_json: row.get(8)?,
            synced_at: row.get(9)?,
        })
    }

    fn into_record(self) -> StoreResult<SyncStateRecord> {
        let invalid = |details: String| StoreError::InvalidRow {
            item_key: self.item_key.clone(),
            details,
        };

        let status: RecordStatus = self.status.parse().map_err(invalid)?;
        let annotations: Vec<RemoteAnnotation> = serde_json::from_str(&self.annotations_json)
            .map_err(|e| invalid(format!("annotations: {}", e)))?;
        let synced_at = DateTime::parse_from_rfc3339(&self.synced_at)
            .map_err(|e| invalid(format!("synced_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(SyncStateRecord {
            item_key: self.item_key,
            citation_key: self.citation_key,
            metadata_hash: self.metadata_hash,
            annotations_hash: self.annotations_hash,
            file_path: self.file_path,
            library_version: self.library_version,
            item_version: self.item_version,
            status,
            annotations,
            synced_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(item_key: &str, citation_key: &str) -> SyncStateRecord {
        SyncStateRecord {
            item_key: item_key.to_string(),
            citation_key: citation_key.to_string(),
            metadata_hash: "sha256:meta".to_string(),
            annotations_hash: "sha256:annotations".to_string(),
            file_path: format!("{}.md", citation_key),
            library_version: 10,
            item_version: 7,
            status: RecordStatus::Active,
            annotations: Vec::new(),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_and_get() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        assert!(store.get("K1").unwrap().is_none());

        let rec = record("K1", "smith2020");
        store.put(&rec).unwrap();

        let loaded = store.get("K1").unwrap().unwrap();
        assert!(loaded.same_state(&rec));
        assert_eq!(store.mutation_count(), 1);
    }

    #[test]
    fn test_put_replaces_existing_row() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();

        let mut updated = record("K1", "smith2020a");
        updated.metadata_hash = "sha256:other".to_string();
        store.put(&updated).unwrap();

        let loaded = store.get("K1").unwrap().unwrap();
        assert_eq!(loaded.citation_key, "smith2020a");
        assert_eq!(loaded.file_path, "smith2020a.md");
        assert_eq!(store.all_live().unwrap().len(), 1);
    }

    #[test]
    fn test_live_path_is_unique() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();

        let err = store.put(&record("K2", "smith2020")).unwrap_err();
        assert!(matches!(err, StoreError::PathConflict { ref owner, .. } if owner == "K1"));
    }

    #[test]
    fn test_removed_record_frees_path_and_citation_key() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();
        assert!(store
            .mark_removed("K1", Some("removed/smith2020.md"))
            .unwrap());

        // A different item may now claim the same citation key
        store.put(&record("K2", "smith2020")).unwrap();

        let live = store.live_by_citation_key("smith2020").unwrap().unwrap();
        assert_eq!(live.item_key, "K2");

        let all = store.by_citation_key("smith2020").unwrap();
        assert_eq!(all.len(), 2);

        let removed = store.get("K1").unwrap().unwrap();
        assert_eq!(removed.status, RecordStatus::Removed);
        assert_eq!(removed.file_path, "removed/smith2020.md");
    }

    #[test]
    fn test_mark_removed_twice_is_noop() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();

        assert!(store.mark_removed("K1", None).unwrap());
        assert!(!store.mark_removed("K1", None).unwrap());
        assert!(!store.mark_removed("missing", None).unwrap());
        assert!(store.all_live().unwrap().is_empty());
    }

    #[test]
    fn test_purge() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();

        assert!(store.purge("K1").unwrap());
        assert!(store.get("K1").unwrap().is_none());
        assert!(!store.purge("K1").unwrap());
    }

    #[test]
    fn test_live_by_path() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();

        assert_eq!(
            store.live_by_path("smith2020.md").unwrap().unwrap().item_key,
            "K1"
        );
        assert!(store.live_by_path("doe2019.md").unwrap().is_none());
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        assert_eq!(store.cursor().unwrap(), None);

        store.set_cursor(5).unwrap();
        store.set_cursor(9).unwrap();
        assert_eq!(store.cursor().unwrap(), Some(9));

        let before = store.mutation_count();
        store.set_cursor(9).unwrap();
        assert_eq!(store.mutation_count(), before);

        let err = store.set_cursor(3).unwrap_err();
        assert!(matches!(err, StoreError::CursorRegression { current: 9, requested: 3 }));
        assert_eq!(store.cursor().unwrap(), Some(9));
    }

    #[test]
    fn test_template_fingerprint() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        assert!(store.template_fingerprint().unwrap().is_none());

        store.set_template_fingerprint("sha256:tpl").unwrap();
        let count = store.mutation_count();
        store.set_template_fingerprint("sha256:tpl").unwrap();
        assert_eq!(store.mutation_count(), count);
        assert_eq!(
            store.template_fingerprint().unwrap().as_deref(),
            Some("sha256:tpl")
        );
    }

    #[test]
    fn test_stats() {
        let mut store = SyncStateStore::open_in_memory().unwrap();
        store.put(&record("K1", "smith2020")).unwrap();
        store.put(&record("K2", "doe2019")).unwrap();
        store.mark_removed("K2", None).unwrap();
        store.set_cursor(42).unwrap();
        store.record_full_sync(Utc::now()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.active_items, 1);
        assert_eq!(stats.removed_items, 1);
        assert_eq!(stats.library_version, Some(42));
        assert!(stats.last_full_sync.is_some());
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("zotmd.db");

        {
            let mut store = SyncStateStore::open(&path).unwrap();
            store.put(&record("K1", "smith2020")).unwrap();
            store.set_cursor(12).unwrap();
        }

        let store = SyncStateStore::open(&path).unwrap();
        assert!(store.get("K1").unwrap().is_some());
        assert_eq!(store.cursor().unwrap(), Some(12));
    }

    #[test]
    fn test_garbage_file_is_reported_as_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zotmd.db");
        std::fs::write(&path, b"this is definitely not an sqlite database, just text").unwrap();

        let err = SyncStateStore::open(&path).err().unwrap();
        assert!(err.is_corruption(), "unexpected error: {err}");

        // The file is left as it was
        let contents = std::fs::read(&path).unwrap();
        assert!(contents.starts_with(b"this is definitely"));
    }
}
