//! Persisted update-tracking records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote catalog identifier of an asset.
pub type AssetId = i64;

/// Remote catalog identifier of one release of an asset.
pub type VersionId = i64;

/// One known release of a tracked asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version_id: VersionId,
    pub name: Option<String>,
    pub base_model: Option<String>,
    /// Opaque timestamp string as reported by the catalog.
    pub released_at: Option<String>,
    pub size_bytes: Option<i64>,
    pub preview_url: Option<String>,
    pub is_in_library: bool,
    pub should_ignore: bool,
    /// Dense, zero-based display order.
    pub sort_index: usize,
}

impl VersionEntry {
    /// Entry for a version known only by id.
    pub fn minimal(version_id: VersionId, sort_index: usize) -> Self {
        Self {
            version_id,
            name: None,
            base_model: None,
            released_at: None,
            size_bytes: None,
            preview_url: None,
            is_in_library: false,
            should_ignore: false,
            sort_index,
        }
    }
}

/// Update-tracking state for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Namespace tag (e.g. "lora", "checkpoint"). Not part of the key.
    pub asset_type: String,
    pub asset_id: AssetId,
    /// Versions ordered by `sort_index`.
    pub versions: Vec<VersionEntry>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub should_ignore_asset: bool,
}

impl AssetRecord {
    /// A record with no known versions that has never been checked.
    pub fn new(asset_type: impl Into<String>, asset_id: AssetId) -> Self {
        Self {
            asset_type: asset_type.into(),
            asset_id,
            versions: Vec::new(),
            last_checked_at: None,
            should_ignore_asset: false,
        }
    }

    pub fn version(&self, version_id: VersionId) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.version_id == version_id)
    }

    pub fn version_mut(&mut self, version_id: VersionId) -> Option<&mut VersionEntry> {
        self.versions.iter_mut().find(|v| v.version_id == version_id)
    }

    /// Whether a newer, non-ignored release than the local ones exists.
    pub fn has_update(&self) -> bool {
        crate::evaluate::has_update(self)
    }

    /// Whether the record is due for a remote check at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        match self.last_checked_at {
            None => true,
            // A TTL too large for chrono never expires.
            Some(checked) => chrono::Duration::from_std(ttl)
                .map(|ttl| now.signed_duration_since(checked) >= ttl)
                .unwrap_or(false),
        }
    }
}

/// Current time truncated to millisecond precision, matching what the store
/// can round-trip.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub(crate) fn to_epoch_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

pub(crate) fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}
