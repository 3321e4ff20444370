//! Modelwatch Core - update tracking for locally held model assets.
//!
//! For every asset present in the local library, the tracker keeps a durable
//! record of the versions the remote catalog publishes, which of them are
//! held locally, and which the user chose to ignore. From that record it
//! answers whether a newer version is available.
//!
//! The crate is headless: the scanner and the remote catalog are supplied by
//! the host through the [`ScannerCache`] and [`MetadataProvider`] traits.
//!
//! # Example
//!
//! ```rust,ignore
//! use modelwatch_core::{TrackerConfig, UpdateService};
//!
//! #[tokio::main]
//! async fn main() -> modelwatch_core::Result<()> {
//!     let service = UpdateService::open("./model_updates.sqlite", TrackerConfig::default())?;
//!
//!     // Refresh stale records for every locally held LoRA
//!     let records = service
//!         .refresh_for_asset_type("lora", &scanner, &provider, false, None)
//!         .await?;
//!     println!("Tracked {} assets", records.len());
//!
//!     for asset_id in service.assets_with_updates("lora")? {
//!         println!("Update available for {}", asset_id);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod evaluate;
pub mod progress;
pub mod provider;
pub mod reconcile;
pub mod record;
pub mod scanner;
pub mod schema;
pub mod store;

mod service;

pub use config::{TrackerConfig, TrackerDefaults};
pub use error::{Result, TrackerError};
pub use evaluate::has_update;
pub use progress::{ProgressCallback, RefreshProgress};
pub use provider::{FetchOutcome, MetadataProvider, RemoteVersion};
pub use record::{AssetId, AssetRecord, VersionEntry, VersionId};
pub use scanner::{LocalAsset, RemoteRef, ScannerCache};
pub use service::UpdateService;
pub use store::RecordStore;
