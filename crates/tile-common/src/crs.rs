//! Spatial reference handling.
//!
//! Rasters record their spatial reference as a single string attribute.
//! [`SpatialRef`] parses that attribute into the handful of forms the
//! pipeline understands and renders it back.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TileCommonError, TileCommonResult};

/// EPSG code of Web Mercator, the only published target projection.
pub const WEB_MERCATOR_EPSG: u32 = 3857;

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

/// Mean earth radius used by NCEP grids (GRIB2 shape of earth 6).
pub const NCEP_EARTH_RADIUS: f64 = 6_371_229.0;

/// Markers that identify a reference written without a real datum.
const ENGINEERING_MARKERS: [&str; 2] = ["Unknown engineering datum", "ENGCRS"];

/// Lambert Conformal Conic parameters in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LccParams {
    /// First standard parallel.
    pub lat_1: f64,
    /// Second standard parallel.
    pub lat_2: f64,
    /// Latitude of origin.
    pub lat_0: f64,
    /// Central meridian (LoV).
    pub lon_0: f64,
    /// Sphere radius in meters.
    pub radius: f64,
}

impl LccParams {
    /// Render as a PROJ definition string.
    pub fn to_proj_string(&self) -> String {
        format!(
            "+proj=lcc +lat_1={} +lat_2={} +lat_0={} +lon_0={} +R={} +units=m +no_defs",
            self.lat_1, self.lat_2, self.lat_0, self.lon_0, self.radius
        )
    }
}

/// A raster's spatial reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpatialRef {
    /// Authority-coded reference, e.g. EPSG:4326 or EPSG:3857.
    Epsg(u32),
    /// Spherical Lambert Conformal Conic (HRRR/NAM CONUS grids).
    LambertConformal(LccParams),
    /// Any other PROJ definition. Only the external warp understands these.
    Proj(String),
    /// A reference carrying an "unknown engineering datum" marker.
    EngineeringUnknown(String),
    /// No reference recorded at all.
    Missing,
}

impl SpatialRef {
    pub fn web_mercator() -> Self {
        SpatialRef::Epsg(WEB_MERCATOR_EPSG)
    }

    pub fn wgs84() -> Self {
        SpatialRef::Epsg(WGS84_EPSG)
    }

    /// Parse a stored attribute. `None` maps to [`SpatialRef::Missing`].
    pub fn from_attribute(value: Option<&str>) -> TileCommonResult<Self> {
        let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(SpatialRef::Missing);
        };

        if ENGINEERING_MARKERS.iter().any(|m| raw.contains(m)) {
            return Ok(SpatialRef::EngineeringUnknown(raw.to_string()));
        }

        let upper = raw.to_uppercase();
        if let Some(code) = upper.strip_prefix("EPSG:") {
            return code
                .trim()
                .parse::<u32>()
                .map(SpatialRef::Epsg)
                .map_err(|_| TileCommonError::InvalidSpatialRef(raw.to_string()));
        }

        if raw.starts_with("+proj=") {
            if let Some(params) = parse_lcc(raw) {
                return Ok(SpatialRef::LambertConformal(params));
            }
            return Ok(SpatialRef::Proj(raw.to_string()));
        }

        Err(TileCommonError::InvalidSpatialRef(raw.to_string()))
    }

    /// The attribute form of this reference. `None` for [`SpatialRef::Missing`].
    pub fn to_attribute(&self) -> Option<String> {
        match self {
            SpatialRef::Missing => None,
            other => Some(other.to_string()),
        }
    }

    /// Authority code when the reference is EPSG-coded.
    pub fn authority_code(&self) -> Option<u32> {
        match self {
            SpatialRef::Epsg(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_web_mercator(&self) -> bool {
        self.authority_code() == Some(WEB_MERCATOR_EPSG)
    }
}

impl fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialRef::Epsg(code) => write!(f, "EPSG:{}", code),
            SpatialRef::LambertConformal(p) => write!(f, "{}", p.to_proj_string()),
            SpatialRef::Proj(s) | SpatialRef::EngineeringUnknown(s) => write!(f, "{}", s),
            SpatialRef::Missing => write!(f, "<missing>"),
        }
    }
}

/// Parse `+key=value` tokens of a `+proj=lcc` definition.
fn parse_lcc(proj: &str) -> Option<LccParams> {
    let mut kind = None;
    let mut lat_1 = None;
    let mut lat_2 = None;
    let mut lat_0 = None;
    let mut lon_0 = None;
    let mut radius = NCEP_EARTH_RADIUS;

    for token in proj.split_whitespace() {
        let Some((key, value)) = token.trim_start_matches('+').split_once('=') else {
            continue;
        };
        match key {
            "proj" => kind = Some(value),
            "lat_1" => lat_1 = value.parse().ok(),
            "lat_2" => lat_2 = value.parse().ok(),
            "lat_0" => lat_0 = value.parse().ok(),
            "lon_0" => lon_0 = value.parse().ok(),
            "R" => radius = value.parse().ok()?,
            _ => {}
        }
    }

    if kind != Some("lcc") {
        return None;
    }
    let lat_1: f64 = lat_1?;
    Some(LccParams {
        lat_1,
        lat_2: lat_2.unwrap_or(lat_1),
        lat_0: lat_0.unwrap_or(lat_1),
        lon_0: lon_0?,
        radius,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg() {
        let srs = SpatialRef::from_attribute(Some("EPSG:3857")).unwrap();
        assert_eq!(srs, SpatialRef::Epsg(3857));
        assert!(srs.is_web_mercator());

        let srs = SpatialRef::from_attribute(Some("epsg:4326")).unwrap();
        assert_eq!(srs.authority_code(), Some(4326));
    }

    #[test]
    fn test_missing_and_empty() {
        assert_eq!(SpatialRef::from_attribute(None).unwrap(), SpatialRef::Missing);
        assert_eq!(SpatialRef::from_attribute(Some("  ")).unwrap(), SpatialRef::Missing);
        assert_eq!(SpatialRef::Missing.to_attribute(), None);
    }

    #[test]
    fn test_engineering_marker() {
        let wkt = r#"ENGCRS["Unknown engineering datum",EDATUM[""]]"#;
        let srs = SpatialRef::from_attribute(Some(wkt)).unwrap();
        assert!(matches!(srs, SpatialRef::EngineeringUnknown(_)));
        assert_eq!(srs.authority_code(), None);
    }

    #[test]
    fn test_lcc_roundtrip_through_attribute() {
        let params = LccParams {
            lat_1: 38.5,
            lat_2: 38.5,
            lat_0: 38.5,
            lon_0: -97.5,
            radius: NCEP_EARTH_RADIUS,
        };
        let attr = SpatialRef::LambertConformal(params).to_attribute().unwrap();
        let parsed = SpatialRef::from_attribute(Some(&attr)).unwrap();
        assert_eq!(parsed, SpatialRef::LambertConformal(params));
    }

    #[test]
    fn test_other_proj_kept_verbatim() {
        let proj = "+proj=stere +lat_0=90 +lat_ts=60 +lon_0=-105 +R=6371229 +units=m";
        let srs = SpatialRef::from_attribute(Some(proj)).unwrap();
        assert_eq!(srs, SpatialRef::Proj(proj.to_string()));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(SpatialRef::from_attribute(Some("not a crs")).is_err());
        assert!(SpatialRef::from_attribute(Some("EPSG:abc")).is_err());
    }
}
