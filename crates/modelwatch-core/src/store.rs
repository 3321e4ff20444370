//! SQLite-backed record store.
//!
//! Records are keyed on `asset_id` alone; `asset_type` is stored alongside as
//! metadata. Two asset types sharing a numeric id therefore share one row and
//! the last write wins.

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::record::{from_epoch_seconds, to_epoch_seconds, AssetId, AssetRecord, VersionEntry};
use crate::schema::{self, STATUS_TABLE, VERSIONS_TABLE};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const STATUS_COLUMNS: &str = "asset_id, asset_type, last_checked_at, should_ignore_asset";
const VERSION_COLUMNS: &str = "asset_id, version_id, sort_index, name, base_model, released_at, \
     size_bytes, preview_url, is_in_library, should_ignore";

/// Persistent store for update-tracking records.
///
/// Thread-safe via an internal mutex on the connection. Read-modify-write
/// sequences across calls are serialized by the service, not here.
pub struct RecordStore {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Open (or create) the store at `db_path` and bring its schema up to date.
    pub fn open(db_path: impl AsRef<Path>, config: &TrackerConfig) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| TrackerError::Io {
                    message: format!("Failed to create database directory: {}", e),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| TrackerError::Database {
            message: format!("Failed to open update database: {}", e),
            source: Some(e),
        })?;

        // WAL lets readers proceed while a refresh is writing.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TrackerError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::from_connection(conn, Some(db_path.to_path_buf()), config)
    }

    /// In-memory store, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None, &TrackerConfig::default())
    }

    fn from_connection(
        mut conn: Connection,
        db_path: Option<PathBuf>,
        config: &TrackerConfig,
    ) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        schema::ensure_schema(&mut conn)?;

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| TrackerError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Load one record.
    ///
    /// Lookup is by `asset_id`; a stored record of a different type is
    /// returned as-is.
    pub fn get(&self, asset_type: &str, asset_id: AssetId) -> Result<Option<AssetRecord>> {
        let conn = self.lock()?;

        let record = conn
            .query_row(
                &format!("SELECT {STATUS_COLUMNS} FROM {STATUS_TABLE} WHERE asset_id = ?1"),
                params![asset_id],
                row_to_record,
            )
            .optional()?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        if record.asset_type != asset_type {
            debug!(
                "Asset {} requested as '{}' but stored as '{}'",
                asset_id, asset_type, record.asset_type
            );
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM {VERSIONS_TABLE}
             WHERE asset_id = ?1 ORDER BY sort_index, version_id"
        ))?;
        record.versions = stmt
            .query_map(params![asset_id], |row| row_to_version(row).map(|(_, v)| v))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(record))
    }

    /// Load several records with one status query and one versions query.
    ///
    /// Ids without a stored record are absent from the returned map.
    pub fn get_many(
        &self,
        asset_type: &str,
        asset_ids: &[AssetId],
    ) -> Result<HashMap<AssetId, AssetRecord>> {
        if asset_ids.is_empty() {
            return Ok(HashMap::new());
        }

        // The id list travels as one JSON parameter, so statement size and
        // the bound-variable limit do not grow with the number of ids.
        let ids_json = serde_json::to_string(asset_ids)?;
        let conn = self.lock()?;

        let mut records: HashMap<AssetId, AssetRecord> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM {STATUS_TABLE}
                 WHERE asset_id IN (SELECT value FROM json_each(?1))"
            ))?;
            let rows = stmt.query_map(params![ids_json], row_to_record)?;
            rows.map(|r| r.map(|record| (record.asset_id, record)))
                .collect::<std::result::Result<_, _>>()?
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM {VERSIONS_TABLE}
             WHERE asset_id IN (SELECT value FROM json_each(?1))
             ORDER BY asset_id, sort_index, version_id"
        ))?;
        let versions = stmt.query_map(params![ids_json], row_to_version)?;
        for row in versions {
            let (asset_id, version) = row?;
            if let Some(record) = records.get_mut(&asset_id) {
                record.versions.push(version);
            }
        }

        debug!(
            "Loaded {} of {} requested '{}' records",
            records.len(),
            asset_ids.len(),
            asset_type
        );
        Ok(records)
    }

    /// All records stored under `asset_type`, ordered by asset id.
    pub fn list(&self, asset_type: &str) -> Result<Vec<AssetRecord>> {
        let ids: Vec<AssetId> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT asset_id FROM {STATUS_TABLE} WHERE asset_type = ?1 ORDER BY asset_id"
            ))?;
            let ids = stmt
                .query_map(params![asset_type], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut records = self.get_many(asset_type, &ids)?;
        Ok(ids.iter().filter_map(|id| records.remove(id)).collect())
    }

    /// Replace the stored record for `record.asset_id` in one transaction.
    ///
    /// The status row is inserted or updated; all version rows for the asset
    /// are deleted and re-inserted.
    pub fn upsert(&self, record: &AssetRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO {STATUS_TABLE} ({STATUS_COLUMNS}) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(asset_id) DO UPDATE SET
                     asset_type = excluded.asset_type,
                     last_checked_at = excluded.last_checked_at,
                     should_ignore_asset = excluded.should_ignore_asset"
            ),
            params![
                record.asset_id,
                record.asset_type,
                record.last_checked_at.map(to_epoch_seconds),
                record.should_ignore_asset,
            ],
        )?;

        tx.execute(
            &format!("DELETE FROM {VERSIONS_TABLE} WHERE asset_id = ?1"),
            params![record.asset_id],
        )?;

        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {VERSIONS_TABLE} ({VERSION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ))?;
            for version in &record.versions {
                insert.execute(params![
                    record.asset_id,
                    version.version_id,
                    version.sort_index as i64,
                    version.name,
                    version.base_model,
                    version.released_at,
                    version.size_bytes,
                    version.preview_url,
                    version.is_in_library,
                    version.should_ignore,
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            "Stored {} record {} with {} versions",
            record.asset_type,
            record.asset_id,
            record.versions.len()
        );
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    let last_checked: Option<f64> = row.get(2)?;
    Ok(AssetRecord {
        asset_id: row.get(0)?,
        asset_type: row.get(1)?,
        versions: Vec::new(),
        last_checked_at: last_checked.and_then(from_epoch_seconds),
        should_ignore_asset: row.get(3)?,
    })
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<(AssetId, VersionEntry)> {
    let sort_index: i64 = row.get(2)?;
    Ok((
        row.get(0)?,
        VersionEntry {
            version_id: row.get(1)?,
            sort_index: sort_index.max(0) as usize,
            name: row.get(3)?,
            base_model: row.get(4)?,
            released_at: row.get(5)?,
            size_bytes: row.get(6)?,
            preview_url: row.get(7)?,
            is_in_library: row.get(8)?,
            should_ignore: row.get(9)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now_millis;
    use tempfile::TempDir;

    fn sample_record(asset_id: AssetId) -> AssetRecord {
        let mut record = AssetRecord::new("lora", asset_id);
        record.last_checked_at = Some(now_millis());
        record.versions.push(VersionEntry {
            name: Some("v1".to_string()),
            size_bytes: Some(4096),
            is_in_library: true,
            ..VersionEntry::minimal(10, 0)
        });
        record.versions.push(VersionEntry {
            should_ignore: true,
            preview_url: Some("https://img/11.png".to_string()),
            ..VersionEntry::minimal(11, 1)
        });
        record
    }

    #[test]
    fn test_upsert_and_get() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = sample_record(1);
        store.upsert(&record).unwrap();

        assert_eq!(store.get("lora", 1).unwrap(), Some(record));
        assert_eq!(store.get("lora", 2).unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces_versions() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut record = sample_record(1);
        store.upsert(&record).unwrap();

        record.versions.remove(0);
        record.versions[0].sort_index = 0;
        record.should_ignore_asset = true;
        store.upsert(&record).unwrap();

        let loaded = store.get("lora", 1).unwrap().unwrap();
        assert_eq!(loaded.versions.len(), 1);
        assert_eq!(loaded.versions[0].version_id, 11);
        assert!(loaded.should_ignore_asset);
    }

    #[test]
    fn test_get_many() {
        let store = RecordStore::open_in_memory().unwrap();
        for id in 1..=5 {
            store.upsert(&sample_record(id)).unwrap();
        }

        let records = store.get_many("lora", &[2, 4, 99]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[&2].versions.len(), 2);
        assert_eq!(records[&4], store.get("lora", 4).unwrap().unwrap());
        assert!(store.get_many("lora", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_same_id_different_type_shares_row() {
        let store = RecordStore::open_in_memory().unwrap();
        store.upsert(&sample_record(1)).unwrap();

        let mut other = AssetRecord::new("checkpoint", 1);
        other.versions.push(VersionEntry::minimal(99, 0));
        store.upsert(&other).unwrap();

        let loaded = store.get("lora", 1).unwrap().unwrap();
        assert_eq!(loaded.asset_type, "checkpoint");
        assert!(store.list("lora").unwrap().is_empty());
        assert_eq!(store.list("checkpoint").unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_file_database() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("updates.sqlite");
        let record = sample_record(3);

        {
            let store = RecordStore::open(&path, &TrackerConfig::default()).unwrap();
            store.upsert(&record).unwrap();
            assert_eq!(store.db_path(), Some(path.as_path()));
        }

        let store = RecordStore::open(&path, &TrackerConfig::default()).unwrap();
        assert_eq!(store.get("lora", 3).unwrap(), Some(record));
    }
}
