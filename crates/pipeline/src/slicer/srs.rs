//! Spatial reference checks on colorized rasters before slicing.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use grid_processor::{update_attributes, RasterReader};
use tile_common::{SpatialRef, WEB_MERCATOR_EPSG};

use super::copy_tree;
use crate::error::TilingError;

/// Outcome of [`check_srs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrsStatus {
    Valid,
    NeedsRepair(String),
}

impl SrsStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SrsStatus::Valid)
    }
}

/// Whether a raster is usable for slicing as-is.
///
/// Anything but an explicit EPSG:3857 reference needs repair: a missing
/// attribute, an unknown engineering datum, or another authority code.
pub fn check_srs(raster: &Path) -> Result<SrsStatus, TilingError> {
    let reader = RasterReader::open(raster).map_err(|e| TilingError::SrsRepair {
        path: raster.to_path_buf(),
        message: e.to_string(),
    })?;
    let crs = reader.attributes().crs.as_deref();

    let status = match SpatialRef::from_attribute(crs) {
        Ok(srs) if srs.is_web_mercator() => SrsStatus::Valid,
        Ok(SpatialRef::Missing) => SrsStatus::NeedsRepair("no spatial reference".to_string()),
        Ok(SpatialRef::EngineeringUnknown(_)) => {
            SrsStatus::NeedsRepair("unknown engineering datum".to_string())
        }
        Ok(other) => SrsStatus::NeedsRepair(match other.authority_code() {
            Some(code) => format!("authority code {} is not {}", code, WEB_MERCATOR_EPSG),
            None => format!("no authority code in '{}'", other),
        }),
        Err(e) => SrsStatus::NeedsRepair(e.to_string()),
    };

    if let SrsStatus::NeedsRepair(reason) = &status {
        warn!(raster = %raster.display(), reason = %reason, "Raster spatial reference needs repair");
    }
    Ok(status)
}

/// Copy `raster` into `scratch_dir` and stamp EPSG:3857 on the copy.
///
/// Chunk files are copied byte for byte and the geotransform is kept, so
/// only the `crs` attribute differs. The original is not touched.
pub fn repair_srs(raster: &Path, scratch_dir: &Path) -> Result<PathBuf, TilingError> {
    let repair_error = |message: String| TilingError::SrsRepair {
        path: raster.to_path_buf(),
        message,
    };

    let name = raster
        .file_name()
        .ok_or_else(|| repair_error("raster path has no file name".to_string()))?;
    let target = scratch_dir.join(name);
    if target.exists() {
        fs::remove_dir_all(&target).map_err(|e| repair_error(e.to_string()))?;
    }

    copy_tree(raster, &target).map_err(|e| repair_error(e.to_string()))?;

    update_attributes(&target, |attrs| {
        attrs.crs = SpatialRef::web_mercator().to_attribute();
    })
    .map_err(|e| repair_error(e.to_string()))?;

    info!(
        raster = %raster.display(),
        repaired = %target.display(),
        "Repaired raster spatial reference"
    );
    Ok(target)
}
