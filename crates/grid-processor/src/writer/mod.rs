//! Tiled, overview-pyramided raster stores in Zarr V3 format.
//!
//! A store is a directory holding one `data` array at full resolution and
//! one `overview_{factor}` array per reduction factor. Georeferencing and
//! band metadata live in the attributes of `data` (see [`RasterAttributes`]).
//! Stores are built at a sibling `.partial` path and renamed into place once
//! every array is written.

mod zarr_writer;

pub use zarr_writer::RasterWriter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tile_common::{GeoTransform, SpatialRef};
use tracing::warn;

use crate::config::RasterCompression;
use crate::error::{GridProcessorError, Result};

/// Node of the full-resolution array.
pub const DATA_NODE: &str = "/data";

/// Node of the overview array for `factor`.
pub fn overview_node(factor: u32) -> String {
    format!("/overview_{}", factor)
}

/// Attributes stored on the `data` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterAttributes {
    /// Spatial reference attribute; absent for a raster without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,

    pub geotransform: GeoTransform,

    /// Sentinel for missing samples. `None` means NaN marks them.
    #[serde(default)]
    pub nodata: Option<f32>,

    /// 1 for float grids, 4 for RGBA.
    pub band_count: usize,

    #[serde(default)]
    pub overview_factors: Vec<u32>,

    pub tile_size: usize,

    pub compression: RasterCompression,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RasterAttributes {
    pub fn new(spatial_ref: &SpatialRef, geotransform: GeoTransform, band_count: usize) -> Self {
        Self {
            crs: spatial_ref.to_attribute(),
            geotransform,
            nodata: None,
            band_count,
            overview_factors: Vec::new(),
            tile_size: 512,
            compression: RasterCompression::default(),
            metadata: BTreeMap::new(),
        }
    }

    /// Parse the `crs` attribute.
    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        Ok(SpatialRef::from_attribute(self.crs.as_deref())?)
    }

    pub fn to_json_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(GridProcessorError::invalid_metadata(format!(
                "attributes serialized to {}",
                other
            ))),
        }
    }

    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(map.clone()))?)
    }
}

/// `{path}.partial`, the staging location of a store being written.
pub fn partial_path(path: &Path) -> PathBuf {
    with_suffix(path, ".partial")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a fully built directory to `target`, replacing whatever is there.
///
/// An existing target is renamed aside first and only removed once the new
/// directory is in place, so `target` never holds a half-written tree.
pub fn replace_dir(staged: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        fs::rename(staged, target)?;
        return Ok(());
    }

    let aside = with_suffix(target, &format!(".old-{}", uuid::Uuid::new_v4().simple()));
    fs::rename(target, &aside)?;
    if let Err(e) = fs::rename(staged, target) {
        // Put the previous version back before reporting.
        let _ = fs::rename(&aside, target);
        return Err(e.into());
    }
    if let Err(e) = fs::remove_dir_all(&aside) {
        warn!(path = %aside.display(), error = %e, "Failed to remove replaced directory");
    }
    Ok(())
}

/// Build a directory at `{path}.partial` with `build`, then rename it to
/// `path`. The partial directory is removed when anything fails.
pub fn write_atomic<F>(path: &Path, build: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let partial = partial_path(path);
    if partial.exists() {
        fs::remove_dir_all(&partial)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(&partial)?;

    let result = build(&partial).and_then(|_| replace_dir(&partial, path));
    if result.is_err() && partial.exists() {
        let _ = fs::remove_dir_all(&partial);
    }
    result
}
