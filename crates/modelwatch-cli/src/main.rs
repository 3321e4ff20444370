//! Modelwatch CLI - inspect and maintain model update records.
//!
//! Every command opens the update database, performs one operation through
//! [`UpdateService`], and prints the result as JSON on stdout. Logs go to
//! stderr so the output stays machine-readable.

mod snapshot;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modelwatch_core::{
    AssetId, RefreshProgress, TrackerConfig, TrackerDefaults, UpdateService, VersionId,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "modelwatch")]
#[command(about = "Inspect and maintain model update records")]
struct Args {
    /// Path to the update database
    #[arg(long, default_value = TrackerDefaults::DB_FILE_NAME)]
    db: PathBuf,

    /// JSON tracker configuration (defaults apply when absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored record of one asset
    Show { asset_type: String, asset_id: AssetId },

    /// Print every stored record of an asset type
    List { asset_type: String },

    /// Print ids of assets with a pending update
    Updates { asset_type: String },

    /// Ignore an asset, or stop ignoring it with --clear
    Ignore {
        asset_type: String,
        asset_id: AssetId,
        #[arg(long)]
        clear: bool,
    },

    /// Ignore one version of an asset, or stop ignoring it with --clear
    IgnoreVersion {
        asset_type: String,
        asset_id: AssetId,
        version_id: VersionId,
        #[arg(long)]
        clear: bool,
    },

    /// Replace the set of versions held locally for an asset
    SyncLibrary {
        asset_type: String,
        asset_id: AssetId,
        version_ids: Vec<VersionId>,
    },

    /// Refresh records from a local inventory and a saved catalog snapshot
    Refresh {
        asset_type: String,

        /// JSON array of scanned files
        #[arg(long)]
        inventory: PathBuf,

        /// JSON object mapping asset ids to catalog listings
        #[arg(long)]
        catalog: PathBuf,

        /// Look up every asset, fresh or ignored
        #[arg(long)]
        force: bool,

        /// Restrict the refresh to these asset ids
        #[arg(long = "asset")]
        assets: Vec<AssetId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    debug!("Using database {}", args.db.display());

    let service = UpdateService::open(&args.db, config)
        .with_context(|| format!("Failed to open update database {}", args.db.display()))?;

    run(service, args.command).await
}

async fn run(service: UpdateService, command: Command) -> Result<()> {
    match command {
        Command::Show {
            asset_type,
            asset_id,
        } => print_json(&service.get_record(&asset_type, asset_id)?),
        Command::List { asset_type } => print_json(&service.list_records(&asset_type)?),
        Command::Updates { asset_type } => print_json(&service.assets_with_updates(&asset_type)?),
        Command::Ignore {
            asset_type,
            asset_id,
            clear,
        } => {
            let record = service
                .set_should_ignore_asset(&asset_type, asset_id, !clear)
                .await?;
            print_json(&record)
        }
        Command::IgnoreVersion {
            asset_type,
            asset_id,
            version_id,
            clear,
        } => {
            let record = service
                .set_should_ignore_version(&asset_type, asset_id, version_id, !clear)
                .await?;
            print_json(&record)
        }
        Command::SyncLibrary {
            asset_type,
            asset_id,
            version_ids,
        } => {
            let record = service
                .update_in_library_versions(&asset_type, asset_id, &version_ids)
                .await?;
            print_json(&record)
        }
        Command::Refresh {
            asset_type,
            inventory,
            catalog,
            force,
            assets,
        } => {
            let inventory = snapshot::load_inventory(&inventory)?;
            let catalog = snapshot::SnapshotCatalog::load(&catalog)?;
            let service = service.with_progress_callback(Arc::new(|p: RefreshProgress| {
                info!(
                    "{}: {}/{} assets ({:.0}%)",
                    p.asset_type,
                    p.processed,
                    p.total,
                    p.percent()
                );
            }));

            let targets = (!assets.is_empty()).then_some(assets.as_slice());
            let records = service
                .refresh_for_asset_type(&asset_type, &inventory, &catalog, force, targets)
                .await?;

            let mut records: Vec<_> = records.into_values().collect();
            records.sort_by_key(|r| r.asset_id);
            print_json(&records)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    // Intentional stdout: command output
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
