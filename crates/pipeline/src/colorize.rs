//! Color ramps from the catalog applied to processed rasters.

use std::path::Path;
use tracing::info;

use grid_processor::{Grid, RasterAttributes, RasterWriteOptions, RasterWriter, RgbaRaster};
use renderer::{colorize, RampTable, ReliefMode};

use crate::catalog::{Catalog, ColorRamp};
use crate::error::{ColorError, Result, TransformError};
use crate::transform::read_tiled;

/// Metadata keys written on colorized rasters.
pub const VARIABLE_KEY: &str = "variable";
pub const RAMP_KEY: &str = "color_ramp";

/// Turn a catalog ramp into a relief table ending in a transparent
/// no-data row.
pub fn build_ramp(ramp: &ColorRamp) -> std::result::Result<RampTable, ColorError> {
    let stops: Vec<(f64, &str)> = ramp
        .stops
        .iter()
        .map(|s| (s.value, s.color.as_str()))
        .collect();
    RampTable::from_stops(&stops).map_err(|e| ColorError::InvalidRamp {
        ramp: ramp.name.clone(),
        message: e.to_string(),
    })
}

/// The ramp a variable is drawn with.
pub fn ramp_for_variable<'a>(
    catalog: &'a Catalog,
    variable: &str,
) -> std::result::Result<&'a ColorRamp, ColorError> {
    let def = catalog
        .variable(variable)
        .ok_or_else(|| ColorError::UnknownVariable(variable.to_string()))?;
    let name = def
        .color_ramp
        .as_deref()
        .ok_or_else(|| ColorError::NoRamp(variable.to_string()))?;
    catalog
        .color_ramp(name)
        .ok_or_else(|| ColorError::UndefinedRamp {
            variable: variable.to_string(),
            ramp: name.to_string(),
        })
}

/// Colorize an in-memory grid. Georeferencing and metadata carry over.
pub fn colorize_grid(grid: &Grid, table: &RampTable, mode: ReliefMode) -> Result<RgbaRaster> {
    let rgba = colorize(&grid.data, grid.nodata, table, mode);
    let mut raster = RgbaRaster::new(
        rgba,
        grid.width,
        grid.height,
        grid.spatial_ref.clone(),
        grid.transform,
    )
    .map_err(|e| TransformError::Decode(e.to_string()))?;
    raster.metadata = grid.metadata.clone();
    Ok(raster)
}

/// Read a single-band raster, colorize it and write a 4-band raster with
/// RGBA overviews at `output`.
pub fn colorize_raster(
    input: &Path,
    output: &Path,
    ramp: &ColorRamp,
    mode: ReliefMode,
    options: &RasterWriteOptions,
) -> Result<RasterAttributes> {
    let table = build_ramp(ramp)?;
    let grid = read_tiled(input)?;

    let mut raster = colorize_grid(&grid, &table, mode)?;
    raster
        .metadata
        .insert(RAMP_KEY.to_string(), ramp.name.clone());

    let attrs = RasterWriter::new(options.clone())
        .write_rgba(&raster, output)
        .map_err(|e| TransformError::RasterWrite {
            path: output.to_path_buf(),
            message: e.to_string(),
        })?;

    info!(
        input = %input.display(),
        output = %output.display(),
        ramp = %ramp.name,
        width = raster.width,
        height = raster.height,
        "Colorized raster"
    );
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColorStop;
    use grid_processor::{RasterReader, UNIT_KEY};
    use test_utils::{CATALOG_WITH_UNDEFINED_RAMP, HRRR_CATALOG};
    use tile_common::{BoundingBox, GeoTransform, SpatialRef};

    fn catalog() -> Catalog {
        Catalog::from_yaml_str(HRRR_CATALOG).unwrap()
    }

    fn stop(value: f64, color: &str) -> ColorStop {
        ColorStop {
            value,
            color: color.to_string(),
        }
    }

    #[test]
    fn test_build_ramp_text() {
        let c = catalog();
        let table = build_ramp(c.color_ramp("wind").unwrap()).unwrap();
        assert_eq!(
            table.to_color_relief_text(),
            "0 255 255 255\n50 0 0 255\nnv 0 0 0 0\n"
        );
    }

    #[test]
    fn test_build_ramp_rejects_bad_ramps() {
        let unordered = ColorRamp {
            name: "bad".to_string(),
            stops: vec![stop(10.0, "#000000"), stop(5.0, "#FFFFFF")],
        };
        match build_ramp(&unordered) {
            Err(ColorError::InvalidRamp { ramp, .. }) => assert_eq!(ramp, "bad"),
            other => panic!("unexpected {:?}", other.map(|t| t.rows().len())),
        }

        let bad_hex = ColorRamp {
            name: "hex".to_string(),
            stops: vec![stop(0.0, "#GG0000")],
        };
        assert!(build_ramp(&bad_hex).is_err());
        assert!(build_ramp(&ColorRamp::default()).is_err());
    }

    #[test]
    fn test_ramp_for_variable() {
        let c = catalog();
        assert_eq!(ramp_for_variable(&c, "temperature_2m").unwrap().name, "temperature");
        // Disabled variables still have a ramp
        assert_eq!(ramp_for_variable(&c, "dewpoint_2m").unwrap().name, "temperature");
        assert!(matches!(
            ramp_for_variable(&c, "nope"),
            Err(ColorError::UnknownVariable(_))
        ));

        let broken = Catalog::from_yaml_str(CATALOG_WITH_UNDEFINED_RAMP).unwrap();
        match ramp_for_variable(&broken, "temperature_2m") {
            Err(ColorError::UndefinedRamp { variable, ramp }) => {
                assert_eq!(variable, "temperature_2m");
                assert_eq!(ramp, "no_such_ramp");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_colorize_grid_alpha_and_monotonic() {
        let c = catalog();
        let table = build_ramp(c.color_ramp("wind").unwrap()).unwrap();
        let gt = GeoTransform::from_bounds(&BoundingBox::new(0.0, 0.0, 6.0, 1.0), 6, 1);
        let grid = Grid::new(
            vec![-5.0, 0.0, 12.5, f32::NAN, 37.5, -9999.0],
            6,
            1,
            SpatialRef::web_mercator(),
            gt,
        )
        .unwrap()
        .with_nodata(Some(-9999.0));

        let raster = colorize_grid(&grid, &table, ReliefMode::Interpolate).unwrap();
        let px: Vec<[u8; 4]> = (0..6).map(|i| raster.pixel(i, 0).unwrap()).collect();

        assert_eq!(px[0], [255, 255, 255, 255]); // clamped below first stop
        assert_eq!(px[1], [255, 255, 255, 255]);
        assert_eq!(px[3][3], 0);
        assert_eq!(px[5][3], 0);
        // white -> blue: red falls as the value rises
        assert!(px[1][0] > px[2][0] && px[2][0] > px[4][0]);
        assert!(px.iter().enumerate().all(|(i, p)| (p[3] == 0) == (i == 3 || i == 5)));
    }

    #[test]
    fn test_colorize_raster_writes_rgba_store() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("temperature_2m_hrrr.20260110.t19z.f06.zarr");
        let output = dir.path().join("temperature_2m_hrrr.20260110.t19z.f06_colored.zarr");

        let gt = GeoTransform::from_bounds(&BoundingBox::new(0.0, 0.0, 800.0, 800.0), 8, 8);
        let mut grid = Grid::new(vec![0.0; 64], 8, 8, SpatialRef::web_mercator(), gt).unwrap();
        grid.data[0] = f32::NAN;
        grid.metadata.insert(UNIT_KEY.to_string(), "[C]".to_string());
        crate::transform::write_tiled(&grid, &input, &RasterWriteOptions::default()).unwrap();

        let c = catalog();
        let options = RasterWriteOptions {
            overview_factors: vec![2, 4],
            ..Default::default()
        };
        let attrs = colorize_raster(
            &input,
            &output,
            c.color_ramp("temperature").unwrap(),
            ReliefMode::Interpolate,
            &options,
        )
        .unwrap();
        assert_eq!(attrs.band_count, 4);
        assert_eq!(attrs.geotransform, gt);
        assert_eq!(attrs.metadata[RAMP_KEY], "temperature");
        assert_eq!(attrs.metadata[UNIT_KEY], "[C]");

        let back = RasterReader::open(&output).unwrap().read_rgba().unwrap();
        assert_eq!(back.pixel(0, 0).unwrap()[3], 0);
        assert_eq!(back.pixel(1, 0), Some([255, 255, 255, 255]));
    }
}
