//! Update evaluation for reconciled records.
//!
//! "Update available" is decided purely by numeric version id ordering; the
//! catalog allocates ids in publication order, so timestamps are never
//! compared.

use crate::record::AssetRecord;

/// Whether `record` has a newer release than anything held locally.
///
/// - Always false for ignored assets.
/// - With no local version, true iff any non-ignored version is known.
/// - Otherwise true iff a non-local, non-ignored version has an id greater
///   than the highest local id.
pub fn has_update(record: &AssetRecord) -> bool {
    if record.should_ignore_asset {
        return false;
    }

    let max_local = record
        .versions
        .iter()
        .filter(|v| v.is_in_library)
        .map(|v| v.version_id)
        .max();

    match max_local {
        None => record.versions.iter().any(|v| !v.should_ignore),
        Some(max_local) => record
            .versions
            .iter()
            .any(|v| v.version_id > max_local && !v.is_in_library && !v.should_ignore),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VersionEntry;

    fn entry(version_id: i64, local: bool, ignored: bool) -> VersionEntry {
        VersionEntry {
            is_in_library: local,
            should_ignore: ignored,
            ..VersionEntry::minimal(version_id, 0)
        }
    }

    fn record(versions: Vec<VersionEntry>) -> AssetRecord {
        AssetRecord {
            versions,
            ..AssetRecord::new("lora", 1)
        }
    }

    #[test]
    fn test_newer_version_is_update() {
        let r = record(vec![
            entry(100, true, false),
            entry(101, false, false),
            entry(105, false, true),
        ]);
        assert!(has_update(&r));
    }

    #[test]
    fn test_only_ignored_newer_version_is_not_update() {
        let r = record(vec![entry(100, true, false), entry(105, false, true)]);
        assert!(!has_update(&r));
    }

    #[test]
    fn test_older_remote_version_is_not_update() {
        let r = record(vec![entry(90, false, false), entry(100, true, false)]);
        assert!(!has_update(&r));
    }

    #[test]
    fn test_ignored_asset_never_has_update() {
        let mut r = record(vec![entry(100, true, false), entry(200, false, false)]);
        r.should_ignore_asset = true;
        assert!(!has_update(&r));
    }

    #[test]
    fn test_no_local_versions() {
        assert!(has_update(&record(vec![entry(5, false, false)])));
        assert!(!has_update(&record(vec![entry(5, false, true)])));
        assert!(!has_update(&record(vec![])));
    }
}
