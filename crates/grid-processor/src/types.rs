//! Core types for grid processing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use tile_common::{BoundingBox, GeoTransform, SpatialRef};

use crate::error::{GridProcessorError, Result};

/// Metadata key holding the unit tag of the samples, e.g. `[K]`.
pub const UNIT_KEY: &str = "GRIB_UNIT";

/// A single-band georeferenced grid.
///
/// `data` is row-major with `width` columns. Missing samples are `NaN`;
/// `nodata` is the sentinel recorded when the grid is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub spatial_ref: SpatialRef,
    pub transform: GeoTransform,
    pub nodata: Option<f32>,
    pub metadata: BTreeMap<String, String>,
}

impl Grid {
    /// Build a grid, checking that the data length matches the shape.
    pub fn new(
        data: Vec<f32>,
        width: usize,
        height: usize,
        spatial_ref: SpatialRef,
        transform: GeoTransform,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GridProcessorError::InvalidGrid(format!(
                "empty grid {}x{}",
                width, height
            )));
        }
        if data.len() != width * height {
            return Err(GridProcessorError::InvalidGrid(format!(
                "{} samples for a {}x{} grid",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            spatial_ref,
            transform,
            nodata: None,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_nodata(mut self, nodata: Option<f32>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Value at (col, row), `None` when out of range.
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.data.get(row * self.width + col).copied()
    }

    /// True when a sample is missing (NaN or equal to the nodata sentinel).
    pub fn is_missing(&self, value: f32) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nd| value == nd)
    }

    /// Count of non-missing samples.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_missing(**v)).count()
    }

    /// Min and max of the valid samples.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| !self.is_missing(*v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Footprint in the grid's own coordinates.
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Unit tag recorded in the metadata, if any.
    pub fn unit(&self) -> Option<&str> {
        self.metadata.get(UNIT_KEY).map(String::as_str)
    }
}

/// A four-band (RGBA) georeferenced raster, interleaved by pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaRaster {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub spatial_ref: SpatialRef,
    pub transform: GeoTransform,
    pub metadata: BTreeMap<String, String>,
}

impl RgbaRaster {
    pub fn new(
        data: Vec<u8>,
        width: usize,
        height: usize,
        spatial_ref: SpatialRef,
        transform: GeoTransform,
    ) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height * 4 {
            return Err(GridProcessorError::InvalidGrid(format!(
                "{} bytes for a {}x{} RGBA raster",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            spatial_ref,
            transform,
            metadata: BTreeMap::new(),
        })
    }

    pub fn pixel(&self, col: usize, row: usize) -> Option<[u8; 4]> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let i = (row * self.width + col) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }
}

/// Resampling method used when a grid is reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest neighbor (preserves exact values).
    Nearest,
    /// Bilinear interpolation (smooth, slight value changes).
    #[default]
    Bilinear,
    /// Bicubic interpolation (smoothest, more compute).
    Cubic,
    /// Area average. The point sampler treats this as bilinear.
    Average,
}

impl InterpolationMethod {
    /// The `-r` name understood by external warpers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "near",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::Average => "average",
        }
    }
}

impl FromStr for InterpolationMethod {
    type Err = GridProcessorError;

    /// Parse from string (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nearest" | "near" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "cubic" | "bicubic" => Ok(Self::Cubic),
            "average" => Ok(Self::Average),
            other => Err(GridProcessorError::ConfigError(format!(
                "unknown resampling method: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
            Self::Cubic => write!(f, "cubic"),
            Self::Average => write!(f, "average"),
        }
    }
}
