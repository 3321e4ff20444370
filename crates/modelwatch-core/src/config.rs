//! Configuration for the update tracker.
//!
//! Defaults live as constants on [`TrackerDefaults`]; [`TrackerConfig`] is the
//! runtime value, optionally loaded from a JSON file.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default values for tracker behavior.
pub struct TrackerDefaults;

impl TrackerDefaults {
    /// Records older than this are re-fetched (24 hours).
    pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);
    /// Maximum asset ids per batched remote request.
    pub const BULK_CHUNK_SIZE: usize = 100;
    /// Progress is reported every this many percent of processed assets.
    pub const PROGRESS_STEP_PERCENT: u8 = 10;
    /// SQLite busy timeout.
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DB_FILE_NAME: &'static str = "model_updates.sqlite";
}

/// Runtime configuration for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct TrackerConfig {
    /// Time after which a record is considered stale.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Maximum asset ids per batched remote request.
    pub bulk_chunk_size: usize,
    /// Progress reporting granularity, in percent of total assets.
    pub progress_step_percent: u8,
    /// SQLite busy timeout.
    #[serde(with = "duration_secs")]
    pub busy_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ttl: TrackerDefaults::TTL,
            bulk_chunk_size: TrackerDefaults::BULK_CHUNK_SIZE,
            progress_step_percent: TrackerDefaults::PROGRESS_STEP_PERCENT,
            busy_timeout: TrackerDefaults::BUSY_TIMEOUT,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. Fields absent from the file keep
    /// their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No tracker config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| TrackerError::io_with_path(e, path))?;
        let config: TrackerConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bulk_chunk_size == 0 {
            return Err(TrackerError::Config {
                message: "bulk_chunk_size must be at least 1".to_string(),
            });
        }
        if self.progress_step_percent == 0 || self.progress_step_percent > 100 {
            return Err(TrackerError::Config {
                message: format!(
                    "progress_step_percent must be within 1..=100, got {}",
                    self.progress_step_percent
                ),
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(86_400));
        assert_eq!(config.bulk_chunk_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = TrackerConfig::load(temp.path().join("absent.json")).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tracker.json");
        std::fs::write(&path, r#"{"ttl": 3600, "bulk_chunk_size": 50}"#).unwrap();

        let config = TrackerConfig::load(&path).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert_eq!(config.bulk_chunk_size, 50);
        assert_eq!(
            config.progress_step_percent,
            TrackerDefaults::PROGRESS_STEP_PERCENT
        );
    }

    #[test]
    fn test_load_rejects_zero_chunk_size() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tracker.json");
        std::fs::write(&path, r#"{"bulk_chunk_size": 0}"#).unwrap();

        let err = TrackerConfig::load(&path).unwrap_err();
        assert!(matches!(err, TrackerError::Config { .. }));
    }
}
