//! Reconciliation of stored, local, and remote version state.
//!
//! Pure functions: given the stored record (if any), the set of version ids
//! currently held locally, and optionally a freshly fetched remote listing,
//! produce the record to persist.
//!
//! Guarantees on every output:
//! - version ids are unique;
//! - every local id is present with `is_in_library = true`;
//! - `sort_index` is a dense `0..N-1` sequence ordered by
//!   `(previous sort_index, version_id)`.

use crate::provider::RemoteVersion;
use crate::record::{AssetId, AssetRecord, VersionEntry, VersionId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Merge stored state with the local inventory and an optional remote listing.
///
/// With `remote = Some(..)` the remote order wins and `last_checked_at`
/// advances to `now`. With `remote = None` every known entry is kept and only
/// library membership is refreshed; `last_checked_at` is left untouched.
pub fn reconcile(
    asset_type: &str,
    asset_id: AssetId,
    existing: Option<&AssetRecord>,
    local: &BTreeSet<VersionId>,
    remote: Option<&[RemoteVersion]>,
    now: DateTime<Utc>,
) -> AssetRecord {
    let mut record = AssetRecord::new(asset_type, asset_id);
    if let Some(existing) = existing {
        record.last_checked_at = existing.last_checked_at;
        record.should_ignore_asset = existing.should_ignore_asset;
    }

    let known: HashMap<VersionId, &VersionEntry> = existing
        .map(|e| e.versions.iter().map(|v| (v.version_id, v)).collect())
        .unwrap_or_default();

    let mut versions = match remote {
        Some(remote) => {
            record.last_checked_at = Some(now);
            from_remote(remote, &known, local)
        }
        None => existing
            .map(|e| {
                e.versions
                    .iter()
                    .map(|v| VersionEntry {
                        is_in_library: local.contains(&v.version_id),
                        ..v.clone()
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };

    append_missing_local(&mut versions, &known, local);
    normalize_sort_order(&mut versions);
    record.versions = versions;
    record
}

/// Reconcile after the catalog reported the asset as gone.
///
/// Local data is kept as-is; the asset is flagged ignored so later cycles stop
/// fetching it. `last_checked_at` only advances when the flag is newly set.
pub fn mark_not_found(
    asset_type: &str,
    asset_id: AssetId,
    existing: Option<&AssetRecord>,
    local: &BTreeSet<VersionId>,
    now: DateTime<Utc>,
) -> AssetRecord {
    let mut record = reconcile(asset_type, asset_id, existing, local, None, now);
    if !record.should_ignore_asset {
        record.should_ignore_asset = true;
        record.last_checked_at = Some(now);
    }
    record
}

/// Sort by `(sort_index, version_id)` and renumber densely from zero.
pub fn normalize_sort_order(versions: &mut [VersionEntry]) {
    versions.sort_by_key(|v| (v.sort_index, v.version_id));
    for (index, entry) in versions.iter_mut().enumerate() {
        entry.sort_index = index;
    }
}

fn from_remote(
    remote: &[RemoteVersion],
    known: &HashMap<VersionId, &VersionEntry>,
    local: &BTreeSet<VersionId>,
) -> Vec<VersionEntry> {
    let mut seen = HashSet::new();
    remote
        .iter()
        .filter(|rv| seen.insert(rv.version_id))
        .enumerate()
        .map(|(position, rv)| {
            let previous = known.get(&rv.version_id);
            VersionEntry {
                version_id: rv.version_id,
                name: rv.name.clone(),
                base_model: rv.base_model.clone(),
                released_at: rv.released_at.clone(),
                size_bytes: rv.size_bytes,
                preview_url: rv
                    .preview_url
                    .clone()
                    .or_else(|| previous.and_then(|p| p.preview_url.clone())),
                is_in_library: local.contains(&rv.version_id),
                should_ignore: previous.is_some_and(|p| p.should_ignore),
                sort_index: position,
            }
        })
        .collect()
}

/// Local ids absent from `versions` go after everything else, reusing stored
/// metadata when the id was known before.
fn append_missing_local(
    versions: &mut Vec<VersionEntry>,
    known: &HashMap<VersionId, &VersionEntry>,
    local: &BTreeSet<VersionId>,
) {
    let present: HashSet<VersionId> = versions.iter().map(|v| v.version_id).collect();
    let tail_index = versions
        .iter()
        .map(|v| v.sort_index + 1)
        .max()
        .unwrap_or(0);

    for &version_id in local.iter().filter(|id| !present.contains(id)) {
        let mut entry = match known.get(&version_id) {
            Some(previous) => (*previous).clone(),
            None => VersionEntry::minimal(version_id, tail_index),
        };
        entry.sort_index = tail_index;
        entry.is_in_library = true;
        versions.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now_millis;

    fn remote(id: i64) -> RemoteVersion {
        RemoteVersion {
            version_id: id,
            name: Some(format!("v{}", id)),
            base_model: Some("SD 1.5".to_string()),
            released_at: None,
            size_bytes: Some(1024),
            preview_url: None,
        }
    }

    fn local(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    fn assert_dense(record: &AssetRecord) {
        let indices: Vec<usize> = record.versions.iter().map(|v| v.sort_index).collect();
        assert_eq!(indices, (0..record.versions.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_local_sync_keeps_unknown_history_and_flags() {
        let mut stored = AssetRecord::new("lora", 7);
        stored.versions.push(VersionEntry::minimal(9, 0));
        stored.versions.push(VersionEntry {
            should_ignore: true,
            ..VersionEntry::minimal(10, 1)
        });

        let merged = reconcile("lora", 7, Some(&stored), &local(&[10, 11]), None, now_millis());

        assert_eq!(merged.versions.len(), 3);
        let v9 = merged.version(9).unwrap();
        assert!(!v9.is_in_library);
        assert_eq!(v9, &stored.versions[0]);
        let v10 = merged.version(10).unwrap();
        assert!(v10.is_in_library);
        assert!(v10.should_ignore);
        let v11 = merged.version(11).unwrap();
        assert!(v11.is_in_library);
        assert!(!v11.should_ignore);
        assert_dense(&merged);
        assert_eq!(merged.last_checked_at, None);
    }

    #[test]
    fn test_remote_order_and_carry_over() {
        let mut stored = AssetRecord::new("lora", 1);
        stored.versions.push(VersionEntry {
            should_ignore: true,
            preview_url: Some("https://img/old.png".to_string()),
            ..VersionEntry::minimal(105, 0)
        });

        let now = now_millis();
        let listing = vec![remote(105), remote(101), remote(100)];
        let merged = reconcile("lora", 1, Some(&stored), &local(&[100]), Some(&listing), now);

        let order: Vec<i64> = merged.versions.iter().map(|v| v.version_id).collect();
        assert_eq!(order, vec![105, 101, 100]);
        let v105 = merged.version(105).unwrap();
        assert!(v105.should_ignore);
        assert_eq!(v105.preview_url.as_deref(), Some("https://img/old.png"));
        assert!(merged.version(100).unwrap().is_in_library);
        assert_eq!(merged.last_checked_at, Some(now));
        assert_dense(&merged);
    }

    #[test]
    fn test_local_missing_from_remote_keeps_stored_metadata() {
        let mut stored = AssetRecord::new("lora", 1);
        stored.versions.push(VersionEntry {
            name: Some("legacy".to_string()),
            ..VersionEntry::minimal(50, 0)
        });

        let listing = vec![remote(60)];
        let merged = reconcile(
            "lora",
            1,
            Some(&stored),
            &local(&[50, 55]),
            Some(&listing),
            now_millis(),
        );

        let order: Vec<i64> = merged.versions.iter().map(|v| v.version_id).collect();
        assert_eq!(order, vec![60, 50, 55]);
        assert_eq!(merged.version(50).unwrap().name.as_deref(), Some("legacy"));
        assert!(merged.version(50).unwrap().is_in_library);
        assert!(merged.version(55).unwrap().name.is_none());
        assert_dense(&merged);
    }

    #[test]
    fn test_duplicate_remote_ids_are_collapsed() {
        let listing = vec![remote(3), remote(2), remote(3)];
        let merged = reconcile("lora", 1, None, &local(&[]), Some(&listing), now_millis());
        let order: Vec<i64> = merged.versions.iter().map(|v| v.version_id).collect();
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn test_first_sight_without_remote() {
        let merged = reconcile("lora", 42, None, &local(&[100]), None, now_millis());
        assert_eq!(merged.versions.len(), 1);
        assert!(merged.versions[0].is_in_library);
        assert_eq!(merged.last_checked_at, None);
    }

    #[test]
    fn test_normalize_fills_gaps() {
        let mut versions = vec![
            VersionEntry::minimal(8, 7),
            VersionEntry::minimal(4, 2),
            VersionEntry::minimal(3, 7),
        ];
        normalize_sort_order(&mut versions);
        let order: Vec<(i64, usize)> = versions.iter().map(|v| (v.version_id, v.sort_index)).collect();
        assert_eq!(order, vec![(4, 0), (3, 1), (8, 2)]);
    }

    #[test]
    fn test_not_found_flags_once() {
        let t0 = now_millis();
        let first = mark_not_found("lora", 1, None, &local(&[100]), t0);
        assert!(first.should_ignore_asset);
        assert_eq!(first.last_checked_at, Some(t0));
        assert!(first.version(100).unwrap().is_in_library);

        let t1 = t0 + chrono::Duration::hours(1);
        let second = mark_not_found("lora", 1, Some(&first), &local(&[100]), t1);
        assert_eq!(second.last_checked_at, Some(t0));
    }
}
