//! Progress reporting for multi-asset refreshes.

use serde::Serialize;
use std::sync::Arc;

/// Snapshot passed to a [`ProgressCallback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshProgress {
    pub asset_type: String,
    pub processed: usize,
    pub total: usize,
}

impl RefreshProgress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f32 * 100.0 / self.total as f32
        }
    }
}

/// Callback invoked as a refresh works through its assets.
pub type ProgressCallback = Arc<dyn Fn(RefreshProgress) + Send + Sync + 'static>;

/// Decides when a refresh over `total` assets should report progress.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProgressTicker {
    total: usize,
    step: usize,
}

impl ProgressTicker {
    pub(crate) fn new(total: usize, step_percent: u8) -> Self {
        let step = (total * usize::from(step_percent) / 100).max(1);
        Self { total, step }
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Whether to report after `processed` assets.
    pub(crate) fn should_report(&self, processed: usize) -> bool {
        processed == self.total || processed % self.step == 0
    }
}
