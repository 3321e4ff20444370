//! Metadata provider interface for the remote catalog.
//!
//! The wire protocol lives behind [`MetadataProvider`]. Providers hand back
//! loosely-typed JSON payloads; [`parse_versions`] turns them into fixed-shape
//! [`RemoteVersion`] descriptors, discarding entries it cannot use.

use crate::record::{AssetId, VersionId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a remote catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    /// The lookup succeeded.
    Found(T),
    /// The catalog asked us to slow down.
    RateLimited { retry_after_secs: Option<u64> },
    /// The catalog no longer knows this asset.
    NotFound,
    /// Any other failure (transport, server error, undecodable body).
    Failed(String),
}

impl<T> FetchOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found(_))
    }
}

/// Source of remote version listings.
///
/// `payload` values are whatever the catalog returned for one asset: either an
/// object carrying a `modelVersions` / `versions` array, or the array itself.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Name used in logs and rate-limit errors.
    fn name(&self) -> &str {
        "remote"
    }

    /// Fetch the ordered version listing for one asset.
    async fn get_versions(&self, asset_id: AssetId) -> FetchOutcome<Value>;

    /// Whether [`MetadataProvider::get_versions_bulk`] is implemented.
    fn supports_bulk(&self) -> bool {
        false
    }

    /// Fetch listings for several assets in one request.
    ///
    /// Ids missing from the returned map are resolved individually by the
    /// caller.
    async fn get_versions_bulk(
        &self,
        _asset_ids: &[AssetId],
    ) -> FetchOutcome<HashMap<AssetId, Value>> {
        FetchOutcome::Failed(format!("{} does not support bulk lookups", self.name()))
    }
}

/// Fixed-shape description of one remote release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVersion {
    pub version_id: VersionId,
    pub name: Option<String>,
    pub base_model: Option<String>,
    pub released_at: Option<String>,
    pub size_bytes: Option<i64>,
    pub preview_url: Option<String>,
}

/// Extract the ordered version list from a provider payload.
///
/// Returns `None` when the payload carries no version array at all (error
/// bodies, unrelated objects). Individual entries without a usable id are
/// skipped.
pub fn parse_versions(payload: &Value) -> Option<Vec<RemoteVersion>> {
    let entries = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("modelVersions").or_else(|| map.get("versions")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return None,
        },
        _ => return None,
    };

    let parsed: Vec<RemoteVersion> = entries.iter().filter_map(parse_version).collect();
    if parsed.len() < entries.len() {
        debug!(
            "Skipped {} unusable version entries",
            entries.len() - parsed.len()
        );
    }
    Some(parsed)
}

/// Parse one version descriptor. Returns `None` without a resolvable integer id.
pub fn parse_version(value: &Value) -> Option<RemoteVersion> {
    let obj = value.as_object()?;
    let version_id = obj.get("id").and_then(as_integer)?;

    let released_at = string_field(obj.get("publishedAt"))
        .or_else(|| string_field(obj.get("createdAt")));

    Some(RemoteVersion {
        version_id,
        name: string_field(obj.get("name")),
        base_model: string_field(obj.get("baseModel")),
        released_at,
        size_bytes: obj.get("files").and_then(primary_file_size),
        preview_url: obj.get("images").and_then(preview_image_url),
    })
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Size of the primary file, else the first model file, else the first file.
fn primary_file_size(files: &Value) -> Option<i64> {
    let files = files.as_array()?;
    let is_primary = |f: &&Value| f.get("primary").and_then(Value::as_bool) == Some(true);
    let is_model = |f: &&Value| f.get("type").and_then(Value::as_str) == Some("Model");

    let file = files
        .iter()
        .find(is_primary)
        .or_else(|| files.iter().find(is_model))
        .or_else(|| files.first())?;

    let size_kb = file.get("sizeKB").and_then(Value::as_f64)?;
    if size_kb < 0.0 {
        return None;
    }
    Some((size_kb * 1024.0).round() as i64)
}

/// First still image, falling back to the first media entry of any kind.
fn preview_image_url(images: &Value) -> Option<String> {
    let images = images.as_array()?;
    let url_of = |img: &Value| string_field(img.get("url"));

    images
        .iter()
        .filter(|img| img.get("type").and_then(Value::as_str) != Some("video"))
        .find_map(url_of)
        .or_else(|| images.iter().find_map(url_of))
}
