//! Affine pixel-to-coordinate transforms.
//!
//! Coefficients follow the usual six-term ordering:
//! `x = c[0] + col * c[1] + row * c[2]`, `y = c[3] + col * c[4] + row * c[5]`,
//! where `(col, row)` address pixel corners. North-up rasters have
//! `c[2] == c[4] == 0` and a negative `c[5]`.

use serde::{Deserialize, Serialize};

use crate::error::{TileCommonError, TileCommonResult};
use crate::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform covering `bbox` with a `width` x `height` pixel grid.
    pub fn from_bounds(bbox: &BoundingBox, width: usize, height: usize) -> Self {
        let pixel_w = bbox.width() / width as f64;
        let pixel_h = bbox.height() / height as f64;
        GeoTransform([bbox.min_x, pixel_w, 0.0, bbox.max_y, 0.0, -pixel_h])
    }

    /// Build from a stored JSON array, rejecting anything but six finite numbers.
    pub fn from_slice(values: &[f64]) -> TileCommonResult<Self> {
        let coeffs: [f64; 6] = values.try_into().map_err(|_| {
            TileCommonError::InvalidGeoTransform(format!("expected 6 coefficients, got {}", values.len()))
        })?;
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(TileCommonError::InvalidGeoTransform(format!("{:?}", coeffs)));
        }
        Ok(GeoTransform(coeffs))
    }

    pub fn origin_x(&self) -> f64 {
        self.0[0]
    }

    pub fn origin_y(&self) -> f64 {
        self.0[3]
    }

    pub fn pixel_width(&self) -> f64 {
        self.0[1]
    }

    /// Pixel height (negative for north-up rasters).
    pub fn pixel_height(&self) -> f64 {
        self.0[5]
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0 && self.0[5] < 0.0
    }

    /// Coordinate of a (possibly fractional) pixel corner position.
    pub fn pixel_to_coord(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.0;
        (c[0] + col * c[1] + row * c[2], c[3] + col * c[4] + row * c[5])
    }

    /// Inverse of [`pixel_to_coord`](Self::pixel_to_coord).
    ///
    /// Returns `None` for a degenerate (non-invertible) transform.
    pub fn coord_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let c = &self.0;
        let det = c[1] * c[5] - c[2] * c[4];
        if det == 0.0 {
            return None;
        }
        let dx = x - c[0];
        let dy = y - c[3];
        let col = (dx * c[5] - dy * c[2]) / det;
        let row = (dy * c[1] - dx * c[4]) / det;
        Some((col, row))
    }

    /// Outer bounds of a `width` x `height` raster.
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.pixel_to_coord(0.0, 0.0),
            self.pixel_to_coord(width as f64, 0.0),
            self.pixel_to_coord(0.0, height as f64),
            self.pixel_to_coord(width as f64, height as f64),
        ];
        let xs = corners.iter().map(|c| c.0);
        let ys = corners.iter().map(|c| c.1);
        BoundingBox::new(
            xs.clone().fold(f64::INFINITY, f64::min),
            ys.clone().fold(f64::INFINITY, f64::min),
            xs.fold(f64::NEG_INFINITY, f64::max),
            ys.fold(f64::NEG_INFINITY, f64::max),
        )
    }

    /// Transform of the same footprint at `factor` times coarser resolution.
    pub fn scaled(&self, factor: f64) -> Self {
        let c = &self.0;
        GeoTransform([c[0], c[1] * factor, c[2] * factor, c[3], c[4] * factor, c[5] * factor])
    }
}
