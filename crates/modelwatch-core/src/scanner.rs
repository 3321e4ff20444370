//! Local inventory as reported by the file scanner.
//!
//! The scanner itself lives outside this crate; the tracker only needs the
//! remote `(asset_id, version_id)` pair embedded in each scanned file.

use crate::error::Result;
use crate::record::{AssetId, VersionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Remote catalog identity embedded in a local file's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub asset_id: AssetId,
    pub version_id: VersionId,
}

/// One file known to the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAsset {
    pub file_path: String,
    /// Absent for files with no catalog metadata.
    pub remote: Option<RemoteRef>,
}

impl LocalAsset {
    pub fn new(file_path: impl Into<String>, asset_id: AssetId, version_id: VersionId) -> Self {
        Self {
            file_path: file_path.into(),
            remote: Some(RemoteRef {
                asset_id,
                version_id,
            }),
        }
    }
}

/// Read access to the scanner's cached inventory.
#[async_trait]
pub trait ScannerCache: Send + Sync {
    async fn local_assets(&self) -> Result<Vec<LocalAsset>>;
}

#[async_trait]
impl ScannerCache for Vec<LocalAsset> {
    async fn local_assets(&self) -> Result<Vec<LocalAsset>> {
        Ok(self.clone())
    }
}

/// Group local files into `asset_id -> {version_id}`.
///
/// Files without an embedded remote pair are skipped. Input order is
/// irrelevant.
pub fn group_local_versions<'a>(
    assets: impl IntoIterator<Item = &'a LocalAsset>,
) -> HashMap<AssetId, BTreeSet<VersionId>> {
    let mut grouped: HashMap<AssetId, BTreeSet<VersionId>> = HashMap::new();
    for remote in assets.into_iter().filter_map(|a| a.remote) {
        grouped
            .entry(remote.asset_id)
            .or_default()
            .insert(remote.version_id);
    }
    grouped
}
