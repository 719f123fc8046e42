//! GRIB2 file to published tiles, through every stage.

use pipeline::slicer::tile_stats;
use pipeline::transform::read_tiled;
use pipeline::{
    colorize_file, process_file, resolve_variables, select_variables, tile_file, Catalog, ColorError,
    ConfigurationError, PipelineError, ProcessOptions, ResolutionError, TileOptions, ValidationIssue,
};
use grid_processor::{RasterReader, UNIT_KEY};
use std::collections::BTreeMap;
use tile_common::ZoomRange;
use test_utils::{write_catalog, write_hrrr_file, CATALOG_WITH_UNDEFINED_RAMP, HRRR_CATALOG};

fn hrrr_catalog(dir: &std::path::Path) -> Catalog {
    Catalog::load(write_catalog(dir, HRRR_CATALOG)).expect("load catalog")
}

#[test]
fn test_freezing_temperature_to_white_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = hrrr_catalog(dir.path());
    let source = write_hrrr_file(dir.path(), 273.15);

    let variables = select_variables(&catalog, &["temperature_2m"]).unwrap();
    let outcome = process_file(
        &source,
        &variables,
        &catalog,
        &dir.path().join("processed"),
        &ProcessOptions::default(),
    )
    .unwrap();
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    assert!(outcome.summary.is_clean());

    // 273.15 K is 0 C everywhere
    let processed = &outcome.outputs["temperature_2m"];
    let grid = read_tiled(processed).unwrap();
    assert_eq!(grid.metadata[UNIT_KEY], "[C]");
    let valid: Vec<f32> = grid.data.iter().copied().filter(|v| !v.is_nan()).collect();
    assert!(!valid.is_empty());
    assert!(valid.iter().all(|v| v.abs() < 1e-4), "{:?}", &valid[..valid.len().min(8)]);

    // 0 sits on the white stop of the temperature ramp
    let colored = colorize_file(processed, None, &catalog, &dir.path().join("colored")).unwrap();
    let rgba = RasterReader::open(&colored).unwrap().read_rgba().unwrap();
    let opaque: Vec<&[u8]> = rgba.data.chunks_exact(4).filter(|px| px[3] > 0).collect();
    assert!(!opaque.is_empty());
    assert!(opaque.iter().all(|px| px[..3] == [255, 255, 255]));

    let tiles_root = dir.path().join("tiles");
    let zoom: ZoomRange = "0-4".parse().unwrap();
    let published = tile_file(&colored, &tiles_root, zoom, &TileOptions::default()).unwrap();
    assert_eq!(published, tiles_root.join("temperature_2m/20260110T19z/06"));

    // The fixture covers roughly 38.0-38.2N, 98.0-97.6W: one tile per zoom
    let expected: BTreeMap<u32, usize> = (0..=4).map(|z| (z, 1)).collect();
    assert_eq!(tile_stats(&published).unwrap(), expected);
    for tile in ["0/0/0.png", "1/0/0.png", "2/0/1.png", "3/1/3.png", "4/3/6.png"] {
        assert!(published.join(tile).exists(), "missing {}", tile);
    }

    // Only the published tree is left behind
    let entries: Vec<String> = std::fs::read_dir(&tiles_root)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(entries, vec!["temperature_2m".to_string()]);
}

#[test]
fn test_all_enabled_variables() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = hrrr_catalog(dir.path());
    let source = write_hrrr_file(dir.path(), 290.0);
    let out = dir.path().join("processed");

    let variables = resolve_variables(&catalog, None);
    let outcome = process_file(&source, &variables, &catalog, &out, &ProcessOptions::default()).unwrap();

    let names: Vec<&str> = outcome.outputs.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["composite_reflectivity", "temperature_2m", "wind_gust"]);

    // Reflectivity has no conversion and keeps its source unit
    let refc = read_tiled(&outcome.outputs["composite_reflectivity"]).unwrap();
    assert!(refc.data.iter().filter(|v| !v.is_nan()).all(|v| (v - 35.0).abs() < 1e-3));
    assert!(!refc.metadata.contains_key("UNIT_CONVERSION"));

    let gust = read_tiled(&outcome.outputs["wind_gust"]).unwrap();
    assert!(gust
        .data
        .iter()
        .filter(|v| !v.is_nan())
        .all(|v| (v - 22.3694).abs() < 1e-3));
}

#[test]
fn test_missing_band_does_not_stop_batch() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = hrrr_catalog(dir.path());
    let source = write_hrrr_file(dir.path(), 273.15);

    let variables = select_variables(&catalog, &["dewpoint_2m", "temperature_2m"]).unwrap();
    let outcome = process_file(
        &source,
        &variables,
        &catalog,
        dir.path(),
        &ProcessOptions::default(),
    )
    .unwrap();

    assert!(outcome.outputs.contains_key("temperature_2m"));
    match &outcome.failures["dewpoint_2m"] {
        PipelineError::Resolution(ResolutionError::NotFound { pattern, inspected }) => {
            assert_eq!(pattern, "DPT:2 m");
            assert_eq!(inspected.len(), 6);
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(outcome.summary.total_failed(), 1);
}

#[test]
fn test_undefined_ramp() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::from_yaml_str(CATALOG_WITH_UNDEFINED_RAMP).unwrap();

    assert_eq!(
        catalog.validate(),
        vec![ValidationIssue::UndefinedColorRamp {
            variable: "temperature_2m".to_string(),
            ramp: "no_such_ramp".to_string(),
        }]
    );
    assert!(matches!(
        catalog.ensure_valid(),
        Err(ConfigurationError::InvalidCatalog(_))
    ));

    // Colorizing still reports the ramp by name
    let processed_catalog = hrrr_catalog(dir.path());
    let source = write_hrrr_file(dir.path(), 273.15);
    let variables = select_variables(&processed_catalog, &["temperature_2m"]).unwrap();
    let outcome = process_file(
        &source,
        &variables,
        &processed_catalog,
        dir.path(),
        &ProcessOptions::default(),
    )
    .unwrap();

    let err = colorize_file(&outcome.outputs["temperature_2m"], None, &catalog, dir.path()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Color(ColorError::UndefinedRamp { ref ramp, .. }) if ramp == "no_such_ramp"
    ));
}

#[test]
fn test_shipped_catalog_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/variables.yaml");
    let catalog = Catalog::load(&path).unwrap();
    assert_eq!(catalog.validate(), Vec::<ValidationIssue>::new());

    let names: Vec<&str> = resolve_variables(&catalog, Some(1)).iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["composite_reflectivity", "temperature_2m"]);
}
