//! Update-tracking service: refresh orchestration and the public API.
//!
//! A single async lock serializes every read-modify-write against the store.
//! Refreshes read under the lock, release it for the network round trip, then
//! re-acquire it, re-read the record, merge, and persist, so an update that
//! completed in the meantime is merged rather than overwritten.

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::progress::{ProgressCallback, ProgressTicker, RefreshProgress};
use crate::provider::{parse_versions, FetchOutcome, MetadataProvider, RemoteVersion};
use crate::reconcile::{mark_not_found, normalize_sort_order, reconcile};
use crate::record::{now_millis, AssetId, AssetRecord, VersionEntry, VersionId};
use crate::scanner::{group_local_versions, ScannerCache};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What the remote step produced for one asset.
#[derive(Debug)]
enum RemoteResult {
    Fetched(Vec<RemoteVersion>),
    NotFound,
    /// Lookup attempted and failed; the asset stays stale.
    Failed,
    /// Record was fresh (or ignored); no lookup made.
    Skipped,
}

/// Counters logged at the end of a multi-asset refresh.
#[derive(Debug, Default)]
struct RefreshSummary {
    processed: usize,
    bulk_covered: usize,
    fallback_fetched: usize,
    not_found: usize,
    fetch_failed: usize,
    store_failed: usize,
}

/// Tracks available updates for locally held assets.
///
/// Owned by the composition root and passed to consumers explicitly.
pub struct UpdateService {
    store: RecordStore,
    config: TrackerConfig,
    guard: Mutex<()>,
    progress: Option<ProgressCallback>,
}

impl UpdateService {
    pub fn new(store: RecordStore, config: TrackerConfig) -> Self {
        Self {
            store,
            config,
            guard: Mutex::new(()),
            progress: None,
        }
    }

    /// Open the database at `db_path` and build a service over it.
    ///
    /// Fails if the schema cannot be created or migrated.
    pub fn open(db_path: impl AsRef<Path>, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let store = RecordStore::open(db_path, &config)?;
        Ok(Self::new(store, config))
    }

    /// Report progress of multi-asset refreshes to `callback`.
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    // ========================================
    // Refresh orchestration
    // ========================================

    /// Refresh every asset of `asset_type` found in the scanner cache.
    ///
    /// See [`UpdateService::refresh_local_versions`].
    pub async fn refresh_for_asset_type(
        &self,
        asset_type: &str,
        scanner: &dyn ScannerCache,
        provider: &dyn MetadataProvider,
        force: bool,
        target_ids: Option<&[AssetId]>,
    ) -> Result<HashMap<AssetId, AssetRecord>> {
        let assets = scanner.local_assets().await?;
        let local = group_local_versions(&assets);
        self.refresh_local_versions(asset_type, &local, provider, force, target_ids)
            .await
    }

    /// Refresh the given local inventory.
    ///
    /// Assets without a record, with a stale record, or all of them when
    /// `force` is set, are looked up remotely (ignored assets only when
    /// forced). Lookups go through the provider's bulk endpoint in chunks
    /// when available; ids the bulk response does not cover are fetched one
    /// at a time. Every asset in `local` (restricted to `target_ids` when
    /// given) is then reconciled and persisted, fetched or not.
    ///
    /// A rate-limit signal aborts the call; assets persisted before it stay
    /// committed. Storage failures for one asset are logged and skipped.
    pub async fn refresh_local_versions(
        &self,
        asset_type: &str,
        local: &HashMap<AssetId, BTreeSet<VersionId>>,
        provider: &dyn MetadataProvider,
        force: bool,
        target_ids: Option<&[AssetId]>,
    ) -> Result<HashMap<AssetId, AssetRecord>> {
        let targets: Option<HashSet<AssetId>> = target_ids.map(|ids| ids.iter().copied().collect());
        let mut asset_ids: Vec<AssetId> = local
            .keys()
            .copied()
            .filter(|id| targets.as_ref().map_or(true, |t| t.contains(id)))
            .collect();
        asset_ids.sort_unstable();

        if asset_ids.is_empty() {
            debug!("No local {} assets to refresh", asset_type);
            return Ok(HashMap::new());
        }

        let existing = {
            let _guard = self.guard.lock().await;
            self.store.get_many(asset_type, &asset_ids)?
        };

        let now = now_millis();
        let fetch_targets: Vec<AssetId> = asset_ids
            .iter()
            .copied()
            .filter(|id| self.needs_fetch(existing.get(id), now, force))
            .collect();
        drop(existing);

        info!(
            "Refreshing {} {} assets ({} need remote lookup, force={})",
            asset_ids.len(),
            asset_type,
            fetch_targets.len(),
            force
        );

        let mut summary = RefreshSummary::default();
        let mut prefetched = self.prefetch_bulk(provider, &fetch_targets).await?;
        summary.bulk_covered = prefetched.len();
        let fetch_targets: HashSet<AssetId> = fetch_targets.into_iter().collect();

        let ticker = ProgressTicker::new(asset_ids.len(), self.config.progress_step_percent);
        let mut results = HashMap::with_capacity(asset_ids.len());
        let empty = BTreeSet::new();

        for (index, &asset_id) in asset_ids.iter().enumerate() {
            let remote = if !fetch_targets.contains(&asset_id) {
                RemoteResult::Skipped
            } else if let Some(versions) = prefetched.remove(&asset_id) {
                RemoteResult::Fetched(versions)
            } else {
                summary.fallback_fetched += 1;
                self.fetch_single(provider, asset_id).await?
            };

            match &remote {
                RemoteResult::NotFound => summary.not_found += 1,
                RemoteResult::Failed => summary.fetch_failed += 1,
                _ => {}
            }

            let local_versions = local.get(&asset_id).unwrap_or(&empty);
            match self.apply(asset_type, asset_id, local_versions, remote).await {
                Ok(record) => {
                    results.insert(asset_id, record);
                }
                Err(e) => {
                    warn!("Failed to update {} asset {}: {}", asset_type, asset_id, e);
                    summary.store_failed += 1;
                }
            }

            summary.processed = index + 1;
            self.report_progress(asset_type, &ticker, summary.processed);
        }

        info!(
            "Refreshed {} {} assets: {} via bulk, {} via single lookup, {} not found, {} lookup failures, {} store failures",
            summary.processed,
            asset_type,
            summary.bulk_covered,
            summary.fallback_fetched,
            summary.not_found,
            summary.fetch_failed,
            summary.store_failed
        );

        Ok(results)
    }

    /// Refresh one asset on demand.
    ///
    /// Returns `None` when the asset is neither held locally nor tracked.
    pub async fn refresh_single_asset(
        &self,
        asset_type: &str,
        asset_id: AssetId,
        scanner: &dyn ScannerCache,
        provider: &dyn MetadataProvider,
        force: bool,
    ) -> Result<Option<AssetRecord>> {
        let assets = scanner.local_assets().await?;
        let local = group_local_versions(&assets)
            .remove(&asset_id)
            .unwrap_or_default();

        let existing = {
            let _guard = self.guard.lock().await;
            self.store.get(asset_type, asset_id)?
        };

        if local.is_empty() && existing.is_none() {
            debug!("{} asset {} is not tracked", asset_type, asset_id);
            return Ok(None);
        }

        let remote = if self.needs_fetch(existing.as_ref(), now_millis(), force) {
            self.fetch_single(provider, asset_id).await?
        } else {
            RemoteResult::Skipped
        };

        self.apply(asset_type, asset_id, &local, remote).await.map(Some)
    }

    fn needs_fetch(&self, existing: Option<&AssetRecord>, now: DateTime<Utc>, force: bool) -> bool {
        match existing {
            None => true,
            Some(_) if force => true,
            Some(record) => !record.should_ignore_asset && record.is_stale(now, self.config.ttl),
        }
    }

    async fn prefetch_bulk(
        &self,
        provider: &dyn MetadataProvider,
        asset_ids: &[AssetId],
    ) -> Result<HashMap<AssetId, Vec<RemoteVersion>>> {
        let mut prefetched = HashMap::new();
        if asset_ids.is_empty() || !provider.supports_bulk() {
            return Ok(prefetched);
        }

        for chunk in asset_ids.chunks(self.config.bulk_chunk_size.max(1)) {
            match provider.get_versions_bulk(chunk).await {
                FetchOutcome::Found(payloads) => {
                    let requested: HashSet<&AssetId> = chunk.iter().collect();
                    for (asset_id, payload) in payloads {
                        if !requested.contains(&asset_id) {
                            continue;
                        }
                        match parse_versions(&payload) {
                            Some(versions) => {
                                prefetched.insert(asset_id, versions);
                            }
                            None => debug!(
                                "Bulk payload for asset {} has no version list, retrying singly",
                                asset_id
                            ),
                        }
                    }
                }
                FetchOutcome::RateLimited { retry_after_secs } => {
                    return Err(rate_limited(provider, retry_after_secs));
                }
                FetchOutcome::NotFound => {
                    debug!("Bulk lookup found none of {} assets", chunk.len());
                }
                FetchOutcome::Failed(message) => {
                    warn!(
                        "Bulk lookup of {} assets failed, falling back to single lookups: {}",
                        chunk.len(),
                        message
                    );
                }
            }
        }

        debug!(
            "Bulk lookup covered {} of {} assets",
            prefetched.len(),
            asset_ids.len()
        );
        Ok(prefetched)
    }

    async fn fetch_single(
        &self,
        provider: &dyn MetadataProvider,
        asset_id: AssetId,
    ) -> Result<RemoteResult> {
        match provider.get_versions(asset_id).await {
            FetchOutcome::Found(payload) => match parse_versions(&payload) {
                Some(versions) => Ok(RemoteResult::Fetched(versions)),
                None => {
                    warn!("Version lookup for asset {} returned no version list", asset_id);
                    Ok(RemoteResult::Failed)
                }
            },
            FetchOutcome::RateLimited { retry_after_secs } => {
                Err(rate_limited(provider, retry_after_secs))
            }
            FetchOutcome::NotFound => Ok(RemoteResult::NotFound),
            FetchOutcome::Failed(message) => {
                warn!("Version lookup for asset {} failed: {}", asset_id, message);
                Ok(RemoteResult::Failed)
            }
        }
    }

    /// Merge and persist under the lock, against a freshly re-read record.
    async fn apply(
        &self,
        asset_type: &str,
        asset_id: AssetId,
        local: &BTreeSet<VersionId>,
        remote: RemoteResult,
    ) -> Result<AssetRecord> {
        let _guard = self.guard.lock().await;
        let existing = self.store.get(asset_type, asset_id)?;
        let now = now_millis();

        let record = match remote {
            RemoteResult::Fetched(versions) => {
                reconcile(asset_type, asset_id, existing.as_ref(), local, Some(&versions), now)
            }
            RemoteResult::NotFound => {
                if !existing.as_ref().is_some_and(|r| r.should_ignore_asset) {
                    info!(
                        "{} asset {} no longer exists remotely, ignoring it",
                        asset_type, asset_id
                    );
                }
                mark_not_found(asset_type, asset_id, existing.as_ref(), local, now)
            }
            RemoteResult::Failed | RemoteResult::Skipped => {
                reconcile(asset_type, asset_id, existing.as_ref(), local, None, now)
            }
        };

        self.store.upsert(&record)?;
        Ok(record)
    }

    fn report_progress(&self, asset_type: &str, ticker: &ProgressTicker, processed: usize) {
        let Some(callback) = &self.progress else {
            return;
        };
        if ticker.should_report(processed) {
            let progress = RefreshProgress {
                asset_type: asset_type.to_string(),
                processed,
                total: ticker.total(),
            };
            debug!(
                "Refresh progress for {}: {:.0}%",
                asset_type,
                progress.percent()
            );
            callback(progress);
        }
    }

    // ========================================
    // Read-only queries
    // ========================================

    pub fn get_record(&self, asset_type: &str, asset_id: AssetId) -> Result<Option<AssetRecord>> {
        self.store.get(asset_type, asset_id)
    }

    pub fn list_records(&self, asset_type: &str) -> Result<Vec<AssetRecord>> {
        self.store.list(asset_type)
    }

    /// Whether a tracked asset has a newer release. Untracked assets have none.
    pub fn has_update(&self, asset_type: &str, asset_id: AssetId) -> Result<bool> {
        Ok(self
            .store
            .get(asset_type, asset_id)?
            .is_some_and(|record| record.has_update()))
    }

    /// [`UpdateService::has_update`] for many ids in one store round trip.
    ///
    /// Every requested id is present in the result.
    pub fn has_updates_bulk(
        &self,
        asset_type: &str,
        asset_ids: &[AssetId],
    ) -> Result<HashMap<AssetId, bool>> {
        let records = self.store.get_many(asset_type, asset_ids)?;
        Ok(asset_ids
            .iter()
            .map(|id| (*id, records.get(id).is_some_and(AssetRecord::has_update)))
            .collect())
    }

    /// Ids of tracked assets of `asset_type` with a pending update.
    pub fn assets_with_updates(&self, asset_type: &str) -> Result<Vec<AssetId>> {
        Ok(self
            .store
            .list(asset_type)?
            .into_iter()
            .filter(AssetRecord::has_update)
            .map(|record| record.asset_id)
            .collect())
    }

    // ========================================
    // Offline mutations
    // ========================================

    /// Set or clear the asset-level ignore flag, creating the record if needed.
    pub async fn set_should_ignore_asset(
        &self,
        asset_type: &str,
        asset_id: AssetId,
        should_ignore: bool,
    ) -> Result<AssetRecord> {
        self.mutate(asset_type, asset_id, |record| {
            record.should_ignore_asset = should_ignore;
        })
        .await
    }

    /// Set or clear the ignore flag of one version.
    ///
    /// An unknown version is added as a minimal entry carrying the flag.
    pub async fn set_should_ignore_version(
        &self,
        asset_type: &str,
        asset_id: AssetId,
        version_id: VersionId,
        should_ignore: bool,
    ) -> Result<AssetRecord> {
        self.mutate(asset_type, asset_id, |record| {
            match record.version_mut(version_id) {
                Some(version) => version.should_ignore = should_ignore,
                None => {
                    let mut entry = VersionEntry::minimal(version_id, record.versions.len());
                    entry.should_ignore = should_ignore;
                    record.versions.push(entry);
                }
            }
            normalize_sort_order(&mut record.versions);
        })
        .await
    }

    /// Replace the in-library set of an asset without any network access.
    pub async fn update_in_library_versions(
        &self,
        asset_type: &str,
        asset_id: AssetId,
        version_ids: &[VersionId],
    ) -> Result<AssetRecord> {
        let local: BTreeSet<VersionId> = version_ids.iter().copied().collect();
        let _guard = self.guard.lock().await;
        let existing = self.store.get(asset_type, asset_id)?;
        let record = reconcile(
            asset_type,
            asset_id,
            existing.as_ref(),
            &local,
            None,
            now_millis(),
        );
        self.store.upsert(&record)?;
        Ok(record)
    }

    async fn mutate<F>(&self, asset_type: &str, asset_id: AssetId, change: F) -> Result<AssetRecord>
    where
        F: FnOnce(&mut AssetRecord),
    {
        if asset_type.is_empty() {
            return Err(TrackerError::Validation {
                field: "asset_type".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let _guard = self.guard.lock().await;
        let mut record = self
            .store
            .get(asset_type, asset_id)?
            .unwrap_or_else(|| AssetRecord::new(asset_type, asset_id));
        record.asset_type = asset_type.to_string();
        change(&mut record);
        self.store.upsert(&record)?;
        Ok(record)
    }
}

fn rate_limited(provider: &dyn MetadataProvider, retry_after_secs: Option<u64>) -> TrackerError {
    warn!(
        "Rate limited by {} (retry after {:?}s)",
        provider.name(),
        retry_after_secs
    );
    TrackerError::RateLimited {
        service: provider.name().to_string(),
        retry_after_secs,
    }
}
