//! Schema creation and migration for the update-tracking database.
//!
//! Everything here is idempotent and runs on every open, in this order:
//!
//! 1. `CREATE TABLE IF NOT EXISTS` for both tables.
//! 2. Additive column migrations for rows written by older releases.
//! 3. Rebuild of a versions table still keyed on `version_id` alone into the
//!    composite `(asset_id, version_id)` key.
//! 4. Removal of duplicate status rows per `asset_id` (most recently checked
//!    row wins), then the unique index on `asset_id`.
//! 5. Supporting indices.

use crate::error::{Result, TrackerError};
use rusqlite::Connection;
use tracing::{info, warn};

pub const STATUS_TABLE: &str = "model_update_status";
pub const VERSIONS_TABLE: &str = "model_update_versions";

/// Columns added after the first release, with their SQL definitions.
const STATUS_COLUMNS: &[(&str, &str)] = &[
    ("asset_type", "TEXT NOT NULL DEFAULT ''"),
    ("last_checked_at", "REAL"),
    ("should_ignore_asset", "INTEGER NOT NULL DEFAULT 0"),
];

const VERSION_COLUMNS: &[(&str, &str)] = &[
    ("sort_index", "INTEGER NOT NULL DEFAULT 0"),
    ("name", "TEXT"),
    ("base_model", "TEXT"),
    ("released_at", "TEXT"),
    ("size_bytes", "INTEGER"),
    ("preview_url", "TEXT"),
    ("is_in_library", "INTEGER NOT NULL DEFAULT 0"),
    ("should_ignore", "INTEGER NOT NULL DEFAULT 0"),
];

const CREATE_VERSIONS_SQL: &str = "
    asset_id INTEGER NOT NULL,
    version_id INTEGER NOT NULL,
    sort_index INTEGER NOT NULL DEFAULT 0,
    name TEXT,
    base_model TEXT,
    released_at TEXT,
    size_bytes INTEGER,
    preview_url TEXT,
    is_in_library INTEGER NOT NULL DEFAULT 0,
    should_ignore INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (asset_id, version_id)
";

/// Create or migrate the schema. Any failure is fatal to the caller.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {STATUS_TABLE} (
            asset_id INTEGER NOT NULL,
            asset_type TEXT NOT NULL DEFAULT '',
            last_checked_at REAL,
            should_ignore_asset INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS {VERSIONS_TABLE} ({CREATE_VERSIONS_SQL});"
    ))
    .map_err(|e| TrackerError::migration("Failed to create tables", e))?;

    for (column, definition) in STATUS_COLUMNS {
        add_column_if_missing(conn, STATUS_TABLE, column, definition)?;
    }
    for (column, definition) in VERSION_COLUMNS {
        add_column_if_missing(conn, VERSIONS_TABLE, column, definition)?;
    }

    migrate_versions_primary_key(conn)?;
    dedupe_status_rows(conn)?;

    conn.execute_batch(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_update_status_asset
            ON {STATUS_TABLE}(asset_id);
        CREATE INDEX IF NOT EXISTS idx_update_status_type
            ON {STATUS_TABLE}(asset_type);
        CREATE INDEX IF NOT EXISTS idx_update_versions_asset
            ON {VERSIONS_TABLE}(asset_id, sort_index);"
    ))
    .map_err(|e| TrackerError::migration("Failed to create indices", e))?;

    Ok(())
}

/// Column names of `table`, in declaration order.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| TrackerError::migration("Failed to inspect table", e))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| TrackerError::migration("Failed to inspect table", e))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Columns making up the primary key of `table`, in key order.
fn primary_key_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| TrackerError::migration("Failed to inspect table", e))?;
    let mut keyed: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(5)?, row.get::<_, String>(1)?)))
        .map_err(|e| TrackerError::migration("Failed to inspect table", e))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    keyed.retain(|(position, _)| *position > 0);
    keyed.sort();
    Ok(keyed.into_iter().map(|(_, name)| name).collect())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if table_columns(conn, table)?.iter().any(|c| c == column) {
        return Ok(());
    }

    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
        [],
    )
    .map_err(|e| TrackerError::migration(&format!("Failed to add {}.{}", table, column), e))?;
    info!("Added column {}.{}", table, column);
    Ok(())
}

/// Rebuild the versions table when it is not keyed on `(asset_id, version_id)`.
fn migrate_versions_primary_key(conn: &mut Connection) -> Result<()> {
    let key = primary_key_columns(conn, VERSIONS_TABLE)?;
    if key == ["asset_id", "version_id"] {
        return Ok(());
    }

    warn!(
        "Rebuilding {} with composite primary key (was {:?})",
        VERSIONS_TABLE, key
    );

    let tx = conn
        .transaction()
        .map_err(|e| TrackerError::migration("Failed to begin key migration", e))?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {VERSIONS_TABLE}_new;
        CREATE TABLE {VERSIONS_TABLE}_new ({CREATE_VERSIONS_SQL});
        INSERT OR IGNORE INTO {VERSIONS_TABLE}_new (
            asset_id, version_id, sort_index, name, base_model, released_at,
            size_bytes, preview_url, is_in_library, should_ignore
        )
        SELECT
            asset_id, version_id, COALESCE(sort_index, 0), name, base_model, released_at,
            size_bytes, preview_url, COALESCE(is_in_library, 0), COALESCE(should_ignore, 0)
        FROM {VERSIONS_TABLE}
        WHERE asset_id IS NOT NULL AND version_id IS NOT NULL;
        DROP TABLE {VERSIONS_TABLE};
        ALTER TABLE {VERSIONS_TABLE}_new RENAME TO {VERSIONS_TABLE};"
    ))
    .map_err(|e| TrackerError::migration("Failed to rebuild versions table", e))?;
    tx.commit()
        .map_err(|e| TrackerError::migration("Failed to commit key migration", e))?;

    info!("Migrated {} to composite primary key", VERSIONS_TABLE);
    Ok(())
}

/// Keep only the most recently checked status row per asset id.
fn dedupe_status_rows(conn: &Connection) -> Result<()> {
    let duplicates: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) - COUNT(DISTINCT asset_id) FROM {}",
                STATUS_TABLE
            ),
            [],
            |row| row.get(0),
        )
        .map_err(|e| TrackerError::migration("Failed to count status rows", e))?;

    if duplicates == 0 {
        return Ok(());
    }

    let removed = conn
        .execute(
            &format!(
                "DELETE FROM {STATUS_TABLE} WHERE rowid NOT IN (
                    SELECT row_key FROM (
                        SELECT rowid AS row_key, ROW_NUMBER() OVER (
                            PARTITION BY asset_id
                            ORDER BY COALESCE(last_checked_at, -1) DESC, rowid DESC
                        ) AS row_rank
                        FROM {STATUS_TABLE}
                    ) WHERE row_rank = 1
                )"
            ),
            [],
        )
        .map_err(|e| TrackerError::migration("Failed to remove duplicate status rows", e))?;

    warn!(
        "Removed {} duplicate rows from {}",
        removed, STATUS_TABLE
    );
    Ok(())
}
