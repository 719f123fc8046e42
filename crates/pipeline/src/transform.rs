//! Band extraction, reprojection into Web Mercator and raster store I/O.
//!
//! ```text
//! GRIB2 band ──extract──► Grid (native SRS, north-up)
//!                           │
//!                 reproject │ in memory, or WarpBackend when the SRS
//!                           ▼ is outside what the in-memory path handles
//!                         Grid (EPSG:3857) ──write_tiled──► raster store
//! ```

use bytes::Bytes;
use std::f64::consts::PI;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use grib2_parser::reader::{SCAN_I_NEGATIVE, SCAN_J_POSITIVE};
use grib2_parser::{Grib2File, GridTemplate, LambertGrid, LatLonGrid, PolarStereoGrid};
use grid_processor::{
    reproject_to_web_mercator, Grid, InterpolationMethod, RasterAttributes, RasterReader,
    RasterWriteOptions, RasterWriter,
};
use projection::{normalize_longitude, LambertConformal, Projection};
use tile_common::{GeoTransform, LccParams, SpatialRef};

use crate::error::{ResolutionError, TransformError};
use crate::warp::{WarpBackend, WarpRequest};

/// Open a GRIB2 file, decompressing `.gz` sources in memory.
pub fn open_source(path: &Path) -> Result<Grib2File, ResolutionError> {
    let unreadable = |message: String| ResolutionError::SourceUnreadable {
        path: path.to_path_buf(),
        message,
    };

    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if !is_gzip {
        return Grib2File::open(path).map_err(|e| unreadable(e.to_string()));
    }

    let compressed = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    let data = decompress_gzip(&compressed).map_err(|e| unreadable(format!("gzip: {}", e)))?;
    debug!(
        path = %path.display(),
        compressed = compressed.len(),
        decompressed = data.len(),
        "Decompressed gzip source"
    );
    Grib2File::from_bytes(data).map_err(|e| unreadable(e.to_string()))
}

fn decompress_gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(Bytes::from(decompressed))
}

/// Decode band `band` (1-based) into a georeferenced, north-up grid.
///
/// Missing points become NaN. The band's GRIB metadata (unit, element,
/// level) is carried in [`Grid::metadata`].
pub fn extract(file: &Grib2File, band: usize) -> Result<Grid, TransformError> {
    let message = file
        .band(band)
        .map_err(|e| TransformError::Decode(e.to_string()))?;
    let (mut data, ni, nj) = message
        .values_north_up()
        .map_err(|e| TransformError::Decode(e.to_string()))?;

    let gd = &message.grid_definition;
    let scan = gd.scanning_mode;
    let (spatial_ref, transform) = match &gd.grid {
        GridTemplate::LatLon(g) => latlon_georef(g, scan, ni, &mut data),
        GridTemplate::Lambert(g) => lambert_georef(g, scan, gd.earth_radius, ni, nj),
        GridTemplate::PolarStereographic(g) => polar_georef(g, scan, gd.earth_radius, ni, nj),
        GridTemplate::Other { template, .. } => {
            return Err(TransformError::UnsupportedGrid(format!(
                "GRIB2 grid template 3.{}",
                template
            )))
        }
    };

    let grid = Grid::new(data, ni, nj, spatial_ref, transform)
        .map_err(|e| TransformError::Decode(e.to_string()))?
        .with_metadata(message.metadata(file.tables()));

    debug!(
        band,
        width = grid.width,
        height = grid.height,
        srs = %grid.spatial_ref,
        valid = grid.valid_count(),
        "Extracted band"
    );
    Ok(grid)
}

/// Regular lat/lon grids. Global grids are rotated so columns run from
/// -180; regional grids only have their west edge normalized.
fn latlon_georef(
    g: &LatLonGrid,
    scan: u8,
    ni: usize,
    data: &mut [f32],
) -> (SpatialRef, GeoTransform) {
    let di = g.di.abs();
    let dj = g.dj.abs();
    let west = if scan & SCAN_I_NEGATIVE != 0 {
        g.lo1 - di * (ni as f64 - 1.0)
    } else {
        g.lo1
    };
    let north = g.la1.max(g.la2);

    let is_global = di > 0.0 && (di * ni as f64 - 360.0).abs() < di / 2.0;
    let west = if is_global {
        let west360 = west.rem_euclid(360.0);
        let shift = (((180.0 - west360).rem_euclid(360.0)) / di).round() as usize % ni;
        if shift > 0 {
            for row in data.chunks_mut(ni) {
                row.rotate_left(shift);
            }
        }
        let rotated = west360 + shift as f64 * di;
        if rotated >= 180.0 {
            rotated - 360.0
        } else {
            rotated
        }
    } else {
        normalize_longitude(west)
    };

    let transform = GeoTransform([west - di / 2.0, di, 0.0, north + dj / 2.0, 0.0, -dj]);
    (SpatialRef::wgs84(), transform)
}

/// Geotransform for a projected grid whose first point is `(x0, y0)`.
fn projected_transform(
    (x0, y0): (f64, f64),
    dx: f64,
    dy: f64,
    scan: u8,
    ni: usize,
    nj: usize,
) -> GeoTransform {
    let west = if scan & SCAN_I_NEGATIVE != 0 {
        x0 - dx * (ni as f64 - 1.0)
    } else {
        x0
    };
    let north = if scan & SCAN_J_POSITIVE != 0 {
        y0 + dy * (nj as f64 - 1.0)
    } else {
        y0
    };
    GeoTransform([west - dx / 2.0, dx, 0.0, north + dy / 2.0, 0.0, -dy])
}

fn lambert_georef(
    g: &LambertGrid,
    scan: u8,
    radius: f64,
    ni: usize,
    nj: usize,
) -> (SpatialRef, GeoTransform) {
    let params = LccParams {
        lat_1: g.latin1,
        lat_2: g.latin2,
        lat_0: g.lad,
        lon_0: normalize_longitude(g.lov),
        radius,
    };
    let first = LambertConformal::new(params).forward(normalize_longitude(g.lo1), g.la1);
    let transform = projected_transform(first, g.dx.abs(), g.dy.abs(), scan, ni, nj);
    (SpatialRef::LambertConformal(params), transform)
}

/// Spherical polar stereographic forward, true scale at `lat_ts`.
fn polar_forward(lon: f64, lat: f64, lat_ts: f64, lon_0: f64, radius: f64, south: bool) -> (f64, f64) {
    let to_rad = PI / 180.0;
    let sign = if south { -1.0 } else { 1.0 };
    let k = 1.0 + (sign * lat_ts * to_rad).sin();
    let rho = radius * k * (PI / 4.0 - sign * lat * to_rad / 2.0).tan();
    let dlon = (lon - lon_0) * to_rad;
    (rho * dlon.sin(), -sign * rho * dlon.cos())
}

fn polar_georef(
    g: &PolarStereoGrid,
    scan: u8,
    radius: f64,
    ni: usize,
    nj: usize,
) -> (SpatialRef, GeoTransform) {
    let lon_0 = normalize_longitude(g.lov);
    let first = polar_forward(
        normalize_longitude(g.lo1),
        g.la1,
        g.lad,
        lon_0,
        radius,
        g.south_pole,
    );
    let proj = format!(
        "+proj=stere +lat_0={} +lat_ts={} +lon_0={} +R={} +units=m +no_defs",
        if g.south_pole { -90 } else { 90 },
        g.lad,
        lon_0,
        radius
    );
    let transform = projected_transform(first, g.dx.abs(), g.dy.abs(), scan, ni, nj);
    (SpatialRef::Proj(proj), transform)
}

/// Reproject into EPSG:3857.
///
/// The in-memory path runs first. Only when it rejects the grid's spatial
/// reference is `fallback` tried; any other failure is reported as is.
pub fn reproject(
    grid: &Grid,
    method: InterpolationMethod,
    target_resolution: Option<f64>,
    fallback: &dyn WarpBackend,
) -> Result<Grid, TransformError> {
    let primary = match reproject_to_web_mercator(grid, method, target_resolution) {
        Ok(out) => return Ok(out),
        Err(e) => e,
    };

    if !primary.is_projection_error() {
        return Err(TransformError::Reproject {
            primary: primary.to_string(),
            fallback: None,
        });
    }

    warn!(
        srs = %grid.spatial_ref,
        error = %primary,
        backend = fallback.name(),
        "In-memory reprojection unavailable, using external warp"
    );
    let request = WarpRequest {
        grid,
        method,
        target_resolution,
    };
    fallback.warp(&request).map_err(|e| TransformError::Reproject {
        primary: primary.to_string(),
        fallback: Some(e.to_string()),
    })
}

/// Write a grid as a tiled raster store with overviews.
pub fn write_tiled(
    grid: &Grid,
    path: &Path,
    options: &RasterWriteOptions,
) -> Result<RasterAttributes, TransformError> {
    let attrs = RasterWriter::new(options.clone())
        .write_grid(grid, path)
        .map_err(|e| TransformError::RasterWrite {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    info!(
        path = %path.display(),
        width = grid.width,
        height = grid.height,
        overviews = ?attrs.overview_factors,
        "Wrote raster"
    );
    Ok(attrs)
}

/// Read back a single-band raster store.
pub fn read_tiled(path: &Path) -> Result<Grid, TransformError> {
    RasterReader::open(path)
        .and_then(|reader| reader.read_grid())
        .map_err(|e| TransformError::RasterRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
