//! File-backed inventory and catalog for offline refreshes.
//!
//! The inventory is a JSON array of scanned files, each with an optional
//! `remote: { assetId, versionId }` pair. The catalog snapshot maps asset ids
//! to the listing payload the remote catalog returned for them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use modelwatch_core::{AssetId, FetchOutcome, LocalAsset, MetadataProvider};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub fn load_inventory(path: &Path) -> Result<Vec<LocalAsset>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory {}", path.display()))?;
    let assets: Vec<LocalAsset> = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid inventory {}", path.display()))?;
    debug!("Loaded {} local files from {}", assets.len(), path.display());
    Ok(assets)
}

/// Catalog answering from a saved `{ "<asset_id>": <listing> }` object.
///
/// Assets missing from the snapshot are reported as not found.
pub struct SnapshotCatalog {
    listings: HashMap<AssetId, Value>,
}

impl SnapshotCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog snapshot {}", path.display()))?;
        let raw: HashMap<String, Value> = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid catalog snapshot {}", path.display()))?;

        let listings = raw
            .into_iter()
            .map(|(key, listing)| {
                let asset_id = key
                    .parse::<AssetId>()
                    .with_context(|| format!("Invalid asset id '{}' in catalog snapshot", key))?;
                Ok((asset_id, listing))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { listings })
    }

    #[cfg(test)]
    fn from_listings(listings: HashMap<AssetId, Value>) -> Self {
        Self { listings }
    }
}

#[async_trait]
impl MetadataProvider for SnapshotCatalog {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn get_versions(&self, asset_id: AssetId) -> FetchOutcome<Value> {
        match self.listings.get(&asset_id) {
            Some(listing) => FetchOutcome::Found(listing.clone()),
            None => FetchOutcome::NotFound,
        }
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    async fn get_versions_bulk(&self, asset_ids: &[AssetId]) -> FetchOutcome<HashMap<AssetId, Value>> {
        FetchOutcome::Found(
            asset_ids
                .iter()
                .filter_map(|id| self.listings.get(id).map(|listing| (*id, listing.clone())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_inventory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inventory.json");
        std::fs::write(
            &path,
            r#"[
                {"filePath": "/m/a.safetensors", "remote": {"assetId": 1, "versionId": 10}},
                {"filePath": "/m/b.safetensors", "remote": null}
            ]"#,
        )
        .unwrap();

        let assets = load_inventory(&path).unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0], LocalAsset::new("/m/a.safetensors", 1, 10));
        assert!(assets[1].remote.is_none());
    }

    #[test]
    fn test_load_catalog_rejects_bad_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.json");
        std::fs::write(&path, r#"{"abc": {"modelVersions": []}}"#).unwrap();
        assert!(SnapshotCatalog::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_catalog_lookups() {
        let catalog = SnapshotCatalog::from_listings(HashMap::from([(
            1,
            json!({"modelVersions": [{"id": 10}]}),
        )]));

        assert!(catalog.get_versions(1).await.is_found());
        assert!(matches!(catalog.get_versions(2).await, FetchOutcome::NotFound));
        match catalog.get_versions_bulk(&[1, 2]).await {
            FetchOutcome::Found(found) => assert_eq!(found.len(), 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
