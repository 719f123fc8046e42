//! XYZ tile scheme over Web Mercator.
//!
//! Tiles are square, north-up, and numbered with row 0 at the northern edge
//! (XYZ / "slippy map" convention, not TMS).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TileCommonError, TileCommonResult};
use crate::BoundingBox;

/// Half the width of the Web Mercator square, in meters.
pub const WEB_MERCATOR_EXTENT: f64 = 20037508.342789244;

/// Deepest zoom level accepted by [`ZoomRange`].
pub const MAX_ZOOM: u32 = 24;

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y), 0 at the north edge
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Relative path of this tile inside a tile tree: `{z}/{x}/{y}.png`.
    pub fn relative_path(&self) -> String {
        format!("{}/{}/{}.png", self.z, self.x, self.y)
    }

    /// Get the parent tile (zoom - 1).
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            return None;
        }
        Some(TileCoord {
            z: self.z - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// Web Mercator bounds of the tile, in meters.
    pub fn mercator_bounds(&self) -> BoundingBox {
        let span = tile_span(self.z);
        let min_x = -WEB_MERCATOR_EXTENT + self.x as f64 * span;
        let max_y = WEB_MERCATOR_EXTENT - self.y as f64 * span;
        BoundingBox::new(min_x, max_y - span, min_x + span, max_y)
    }

    /// Geographic (lon/lat) bounds of the tile.
    pub fn latlon_bounds(&self) -> BoundingBox {
        let n = 2u32.pow(self.z) as f64;

        let lon_min = self.x as f64 / n * 360.0 - 180.0;
        let lon_max = (self.x + 1) as f64 / n * 360.0 - 180.0;

        let lat_max = (std::f64::consts::PI * (1.0 - 2.0 * self.y as f64 / n))
            .sinh()
            .atan()
            .to_degrees();
        let lat_min = (std::f64::consts::PI * (1.0 - 2.0 * (self.y + 1) as f64 / n))
            .sinh()
            .atan()
            .to_degrees();

        BoundingBox::new(lon_min, lat_min, lon_max, lat_max)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Width of one tile at zoom `z`, in meters.
pub fn tile_span(z: u32) -> f64 {
    2.0 * WEB_MERCATOR_EXTENT / 2u64.pow(z) as f64
}

/// Ground resolution (meters per pixel) of a `tile_size` tile at zoom `z`.
pub fn tile_resolution(z: u32, tile_size: u32) -> f64 {
    tile_span(z) / tile_size as f64
}

/// The full Web Mercator square.
pub fn web_mercator_bounds() -> BoundingBox {
    BoundingBox::new(
        -WEB_MERCATOR_EXTENT,
        -WEB_MERCATOR_EXTENT,
        WEB_MERCATOR_EXTENT,
        WEB_MERCATOR_EXTENT,
    )
}

/// TMS (bottom-left origin) to XYZ (top-left origin) row flip.
pub fn tms_to_xyz(z: u32, x: u32, y: u32) -> TileCoord {
    let n = 2u32.pow(z);
    TileCoord { z, x, y: n - 1 - y }
}

pub fn xyz_to_tms(coord: &TileCoord) -> (u32, u32, u32) {
    let n = 2u32.pow(coord.z);
    (coord.z, coord.x, n - 1 - coord.y)
}

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub z: u32,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Tiles whose area overlaps `bbox` (Web Mercator meters).
    ///
    /// A footprint edge lying exactly on a tile boundary does not pull in the
    /// neighbouring tile. Returns `None` when the box misses the tile square.
    pub fn covering(bbox: &BoundingBox, z: u32) -> Option<Self> {
        let clipped = bbox.intersection(&web_mercator_bounds())?;
        let span = tile_span(z);
        let last = 2u64.pow(z) as i64 - 1;

        let col = |x: f64| (x + WEB_MERCATOR_EXTENT) / span;
        let row = |y: f64| (WEB_MERCATOR_EXTENT - y) / span;

        let min_x = (col(clipped.min_x).floor() as i64).clamp(0, last);
        let max_x = ((col(clipped.max_x).ceil() as i64) - 1).clamp(0, last);
        let min_y = (row(clipped.max_y).floor() as i64).clamp(0, last);
        let max_y = ((row(clipped.min_y).ceil() as i64) - 1).clamp(0, last);

        if max_x < min_x || max_y < min_y {
            return None;
        }

        Some(TileRange {
            z,
            min_x: min_x as u32,
            max_x: max_x as u32,
            min_y: min_y as u32,
            max_y: max_y as u32,
        })
    }

    pub fn len(&self) -> usize {
        ((self.max_x - self.min_x + 1) as usize) * ((self.max_y - self.min_y + 1) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate tiles column by column.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (self.min_x..=self.max_x)
            .flat_map(move |x| (self.min_y..=self.max_y).map(move |y| TileCoord::new(self.z, x, y)))
    }
}

/// Inclusive zoom interval, parsed from `"0-10"` or `"5"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min: u32,
    pub max: u32,
}

impl ZoomRange {
    pub fn new(min: u32, max: u32) -> TileCommonResult<Self> {
        if min > max {
            return Err(TileCommonError::InvalidZoomRange(format!("{}-{}", min, max)));
        }
        if max > MAX_ZOOM {
            return Err(TileCommonError::ZoomTooDeep(max));
        }
        Ok(Self { min, max })
    }

    pub fn levels(&self) -> impl Iterator<Item = u32> {
        self.min..=self.max
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { min: 0, max: 10 }
    }
}

impl FromStr for ZoomRange {
    type Err = TileCommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TileCommonError::InvalidZoomRange(s.to_string());
        let s = s.trim();
        match s.split_once('-') {
            Some((lo, hi)) => {
                let min = lo.trim().parse().map_err(|_| invalid())?;
                let max = hi.trim().parse().map_err(|_| invalid())?;
                ZoomRange::new(min, max)
            }
            None => {
                let z = s.parse().map_err(|_| invalid())?;
                ZoomRange::new(z, z)
            }
        }
    }
}

impl fmt::Display for ZoomRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_range_parse() {
        assert_eq!("0-4".parse::<ZoomRange>().unwrap(), ZoomRange { min: 0, max: 4 });
        assert_eq!(" 7 ".parse::<ZoomRange>().unwrap(), ZoomRange { min: 7, max: 7 });
        assert!("4-0".parse::<ZoomRange>().is_err());
        assert!("a-b".parse::<ZoomRange>().is_err());
        assert!("0-30".parse::<ZoomRange>().is_err());
    }

    #[test]
    fn test_zoom_zero_covers_world() {
        let bounds = TileCoord::new(0, 0, 0).mercator_bounds();
        assert_eq!(bounds, web_mercator_bounds());
    }

    #[test]
    fn test_row_zero_is_north() {
        let north = TileCoord::new(1, 0, 0).mercator_bounds();
        let south = TileCoord::new(1, 0, 1).mercator_bounds();
        assert!(north.min_y >= south.max_y);
        assert_eq!(north.max_y, WEB_MERCATOR_EXTENT);
    }

    #[test]
    fn test_tms_flip() {
        let coord = tms_to_xyz(3, 2, 0);
        assert_eq!(coord, TileCoord::new(3, 2, 7));
        assert_eq!(xyz_to_tms(&coord), (3, 2, 0));
    }

    #[test]
    fn test_covering_edge_is_exclusive() {
        // Exactly the north-west quadrant at zoom 1.
        let quadrant = TileCoord::new(1, 0, 0).mercator_bounds();
        let range = TileRange::covering(&quadrant, 1).unwrap();
        assert_eq!(range, TileRange { z: 1, min_x: 0, max_x: 0, min_y: 0, max_y: 0 });
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn test_covering_outside_world_is_none() {
        let bbox = BoundingBox::new(3.0e7, 0.0, 3.1e7, 1.0);
        assert!(TileRange::covering(&bbox, 3).is_none());
    }

    #[test]
    fn test_latlon_bounds_of_root() {
        let b = TileCoord::new(0, 0, 0).latlon_bounds();
        assert!((b.min_x + 180.0).abs() < 1e-9);
        assert!((b.max_y - 85.0511287798).abs() < 1e-6);
    }
}
