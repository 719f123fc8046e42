//! In-memory reprojection into Web Mercator.
//!
//! Output-driven: every destination pixel center is carried back through
//! Web Mercator inverse and the source projection forward, then sampled from
//! the source grid. Source pixels are areas, so a destination point that
//! falls anywhere inside the source footprint (including the outer half of
//! an edge pixel) gets a value; points outside become NaN.

use rayon::prelude::*;
use tracing::debug;

use projection::{Geographic, LambertConformal, Projection, WebMercator};
use tile_common::{BoundingBox, GeoTransform, SpatialRef, WEB_MERCATOR_EPSG};

use crate::error::{GridProcessorError, Result};
use crate::interpolation::sample;
use crate::types::{Grid, InterpolationMethod};

/// Points sampled along each footprint edge when projecting its outline.
const EDGE_SAMPLES: usize = 64;

/// The projection matching a grid's spatial reference, if it can be
/// handled in memory.
pub fn source_projection(srs: &SpatialRef) -> Result<Box<dyn Projection>> {
    match srs {
        SpatialRef::Epsg(4326) => Ok(Box::new(Geographic)),
        SpatialRef::Epsg(code) if *code == WEB_MERCATOR_EPSG => Ok(Box::new(WebMercator)),
        SpatialRef::LambertConformal(params) => Ok(Box::new(LambertConformal::new(*params))),
        other => Err(GridProcessorError::UnsupportedProjection(other.to_string())),
    }
}

/// Web Mercator bounds of the grid footprint, from its densified outline.
pub fn web_mercator_footprint(grid: &Grid, source: &dyn Projection) -> Result<BoundingBox> {
    let w = grid.width as f64;
    let h = grid.height as f64;
    let n = EDGE_SAMPLES as f64;

    let mut outline = Vec::with_capacity(EDGE_SAMPLES * 4 + 4);
    for i in 0..=EDGE_SAMPLES {
        let t = i as f64 / n;
        outline.push((t * w, 0.0));
        outline.push((t * w, h));
        outline.push((0.0, t * h));
        outline.push((w, t * h));
    }

    let points = outline.into_iter().map(|(col, row)| {
        let (sx, sy) = grid.transform.pixel_to_coord(col, row);
        let (lon, lat) = source.inverse(sx, sy);
        WebMercator.forward(lon, lat)
    });
    let points: Vec<(f64, f64)> = points.collect();
    if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(GridProcessorError::ProjectionError(
            "footprint does not project into Web Mercator".to_string(),
        ));
    }

    BoundingBox::from_points(points)
        .filter(|b| b.width() > 0.0 && b.height() > 0.0)
        .ok_or_else(|| GridProcessorError::ProjectionError("degenerate footprint".to_string()))
}

/// Reproject a grid into EPSG:3857.
///
/// `target_resolution` fixes the output pixel size in meters; otherwise the
/// source column count is kept across the footprint width.
pub fn reproject_to_web_mercator(
    grid: &Grid,
    method: InterpolationMethod,
    target_resolution: Option<f64>,
) -> Result<Grid> {
    if grid.width == 0 || grid.height == 0 || grid.data.len() != grid.width * grid.height {
        return Err(GridProcessorError::InvalidGrid(format!(
            "{} samples for a {}x{} grid",
            grid.data.len(),
            grid.width,
            grid.height
        )));
    }

    let source = source_projection(&grid.spatial_ref)?;
    let footprint = web_mercator_footprint(grid, source.as_ref())?;

    let resolution = match target_resolution.filter(|r| *r > 0.0) {
        Some(r) => r,
        None => footprint.width() / grid.width as f64,
    };
    let out_width = ((footprint.width() / resolution) - 1e-9).ceil().max(1.0) as usize;
    let out_height = ((footprint.height() / resolution) - 1e-9).ceil().max(1.0) as usize;
    let out_transform =
        GeoTransform([footprint.min_x, resolution, 0.0, footprint.max_y, 0.0, -resolution]);

    debug!(
        src_width = grid.width,
        src_height = grid.height,
        out_width,
        out_height,
        resolution,
        method = %method,
        "Reprojecting grid to EPSG:3857"
    );

    // Treat the nodata sentinel as NaN while sampling.
    let samples: Vec<f32> = match grid.nodata {
        Some(nd) => grid.data.iter().map(|v| if *v == nd { f32::NAN } else { *v }).collect(),
        None => grid.data.clone(),
    };

    let src_w = grid.width as f64;
    let src_h = grid.height as f64;
    let mut output = vec![f32::NAN; out_width * out_height];
    output
        .par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out) in out_row.iter_mut().enumerate() {
                let (x, y) = out_transform.pixel_to_coord(col as f64 + 0.5, row as f64 + 0.5);
                let (lon, lat) = WebMercator.inverse(x, y);
                let (sx, sy) = source.forward(lon, lat);
                let Some((scol, srow)) = grid.transform.coord_to_pixel(sx, sy) else {
                    continue;
                };
                if !(0.0..=src_w).contains(&scol) || !(0.0..=src_h).contains(&srow) {
                    continue;
                }
                *out = sample(&samples, grid.width, grid.height, scol - 0.5, srow - 0.5, method);
            }
        });

    let mut result = Grid::new(output, out_width, out_height, SpatialRef::web_mercator(), out_transform)?;
    result.metadata = grid.metadata.clone();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_common::LccParams;

    fn latlon_grid(data: Vec<f32>, w: usize, h: usize, west: f64, north: f64, step: f64) -> Grid {
        let gt = GeoTransform([west, step, 0.0, north, 0.0, -step]);
        Grid::new(data, w, h, SpatialRef::wgs84(), gt).unwrap()
    }

    #[test]
    fn test_unsupported_reference_is_projection_error() {
        let mut grid = latlon_grid(vec![0.0; 4], 2, 2, 0.0, 2.0, 1.0);
        grid.spatial_ref = SpatialRef::Proj("+proj=stere +lat_0=90".to_string());
        let err = reproject_to_web_mercator(&grid, InterpolationMethod::Bilinear, None).unwrap_err();
        assert!(err.is_projection_error());

        grid.spatial_ref = SpatialRef::Missing;
        assert!(reproject_to_web_mercator(&grid, InterpolationMethod::Bilinear, None)
            .unwrap_err()
            .is_projection_error());
    }

    #[test]
    fn test_latlon_footprint_and_size() {
        let grid = latlon_grid(vec![1.0; 100], 10, 10, -130.0, 46.0, 1.0);
        let out = reproject_to_web_mercator(&grid, InterpolationMethod::Nearest, None).unwrap();

        assert!(out.spatial_ref.is_web_mercator());
        assert_eq!(out.width, 10);
        let (west, _) = WebMercator.forward(-130.0, 0.0);
        assert!((out.transform.origin_x() - west).abs() < 1e-6);
        let (_, north) = WebMercator.forward(0.0, 46.0);
        assert!((out.transform.origin_y() - north).abs() < 1e-6);
        // Rows are rounded up, so only the last one may overhang the footprint.
        assert!(out.valid_count() >= out.width * (out.height - 1));
        assert!(out.data[..out.width].iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_target_resolution_upsamples() {
        let grid = latlon_grid(vec![1.0; 100], 10, 10, -130.0, 46.0, 1.0);
        let out = reproject_to_web_mercator(&grid, InterpolationMethod::Bilinear, Some(20_000.0)).unwrap();
        assert_eq!(out.transform.pixel_width(), 20_000.0);
        assert_eq!(out.transform.pixel_height(), -20_000.0);
        assert!(out.width > 10 * 5);
    }

    #[test]
    fn test_nearest_keeps_longitude_columns() {
        // Each column holds its own index
        let data: Vec<f32> = (0..100).map(|i| (i % 10) as f32).collect();
        let grid = latlon_grid(data, 10, 10, -130.0, 46.0, 1.0);
        let out = reproject_to_web_mercator(&grid, InterpolationMethod::Nearest, None).unwrap();

        let (x, _) = WebMercator.forward(-124.5, 0.0);
        let (col, _) = out.transform.coord_to_pixel(x, out.transform.origin_y()).unwrap();
        let v = out.get(col as usize, out.height / 2).unwrap();
        assert_eq!(v, 5.0);
    }

    #[test]
    fn test_lambert_constant_field_stays_exact() {
        let lcc = LccParams {
            lat_1: 38.5,
            lat_2: 38.5,
            lat_0: 38.5,
            lon_0: -97.5,
            radius: tile_common::crs::NCEP_EARTH_RADIUS,
        };
        let gt = GeoTransform([-300_000.0, 30_000.0, 0.0, 200_000.0, 0.0, -30_000.0]);
        let grid = Grid::new(vec![273.15; 20 * 15], 20, 15, SpatialRef::LambertConformal(lcc), gt).unwrap();

        let out = reproject_to_web_mercator(&grid, InterpolationMethod::Bilinear, None).unwrap();
        let valid: Vec<f32> = out.data.iter().copied().filter(|v| !v.is_nan()).collect();
        assert!(valid.len() > out.data.len() / 2);
        assert!(valid.iter().all(|v| *v == 273.15));
    }

    #[test]
    fn test_nodata_sentinel_becomes_nan() {
        let mut data = vec![5.0f32; 16];
        data[0] = -999.0;
        let grid = latlon_grid(data, 4, 4, 10.0, 4.0, 1.0).with_nodata(Some(-999.0));
        let out = reproject_to_web_mercator(&grid, InterpolationMethod::Nearest, None).unwrap();
        assert!(out.get(0, 0).unwrap().is_nan());
        assert!(out.data.iter().all(|v| v.is_nan() || *v == 5.0));
    }
}
