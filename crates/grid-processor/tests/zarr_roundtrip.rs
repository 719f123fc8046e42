//! Integration tests: write raster stores and read them back.

use std::collections::BTreeMap;
use std::path::Path;

use grid_processor::{
    update_attributes, Grid, RasterCompression, RasterReader, RasterWriteOptions, RasterWriter,
    RgbaRaster, UNIT_KEY,
};
use test_utils::{create_grid_with_nans, create_test_grid, create_test_rgba_pixels};
use tile_common::{BoundingBox, GeoTransform, SpatialRef};

fn mercator_grid(data: Vec<f32>, width: usize, height: usize) -> Grid {
    let bbox = BoundingBox::new(-1_000_000.0, 3_000_000.0, 1_000_000.0, 4_500_000.0);
    let gt = GeoTransform::from_bounds(&bbox, width, height);
    Grid::new(data, width, height, SpatialRef::web_mercator(), gt).unwrap()
}

fn writer(tile_size: usize, compression: RasterCompression) -> RasterWriter {
    RasterWriter::new(RasterWriteOptions {
        compression,
        tile_size,
        ..Default::default()
    })
}

fn read_all_files(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
                files.insert(rel, std::fs::read(&path).unwrap());
            }
        }
    }
    files
}

#[test]
fn test_float_roundtrip_every_compression() {
    let (width, height) = (37, 23);
    let data = create_test_grid(width, height);

    for compression in [
        RasterCompression::None,
        RasterCompression::Deflate,
        RasterCompression::Lz4,
        RasterCompression::Zstd,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.zarr");
        let grid = mercator_grid(data.clone(), width, height);

        writer(16, compression).write_grid(&grid, &path).unwrap();

        let reader = RasterReader::open(&path).unwrap();
        assert_eq!(reader.width(), width);
        assert_eq!(reader.height(), height);
        assert_eq!(reader.attributes().compression, compression);

        let back = reader.read_grid().unwrap();
        assert_eq!(back.data, data, "{}", compression);
        assert_eq!(back.transform, grid.transform);
        assert!(back.spatial_ref.is_web_mercator());
    }
}

#[test]
fn test_nan_and_nodata_survive() {
    let data = create_grid_with_nans(8, 8, &[(0, 0), (7, 7), (3, 4)]);
    let mut grid = mercator_grid(data, 8, 8).with_nodata(Some(-9999.0));
    grid.metadata.insert(UNIT_KEY.to_string(), "[C]".to_string());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nan.zarr");
    writer(4, RasterCompression::Deflate).write_grid(&grid, &path).unwrap();

    let back = RasterReader::open(&path).unwrap().read_grid().unwrap();
    assert!(back.get(0, 0).unwrap().is_nan());
    assert!(back.get(3, 4).unwrap().is_nan());
    assert_eq!(back.get(1, 0), Some(0.0));
    assert_eq!(back.nodata, Some(-9999.0));
    assert_eq!(back.unit(), Some("[C]"));
}

#[test]
fn test_overviews_are_block_means() {
    let (width, height) = (64, 32);
    let data = create_test_grid(width, height);
    let grid = mercator_grid(data.clone(), width, height);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ovr.zarr");
    let attrs = writer(32, RasterCompression::Zstd).write_grid(&grid, &path).unwrap();
    assert_eq!(attrs.overview_factors, vec![2, 4, 8, 16]);

    let reader = RasterReader::open(&path).unwrap();
    let half = reader.read_level_f32(2).unwrap();
    assert_eq!(half.len(), 32 * 16);
    let expected = (data[0] + data[1] + data[width] + data[width + 1]) / 4.0;
    assert!((half[0] - expected).abs() < 1e-4);

    let sixteenth = reader.read_level_f32(16).unwrap();
    assert_eq!(reader.level_dims(16), (4, 2));
    assert_eq!(sixteenth.len(), 8);
}

#[test]
fn test_rgba_roundtrip() {
    let (width, height) = (20, 10);
    let pixels = create_test_rgba_pixels(width, height);
    let bbox = BoundingBox::new(0.0, 0.0, 2000.0, 1000.0);
    let raster = RgbaRaster::new(
        pixels.clone(),
        width,
        height,
        SpatialRef::web_mercator(),
        GeoTransform::from_bounds(&bbox, width, height),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgba.zarr");
    let attrs = writer(8, RasterCompression::Deflate).write_rgba(&raster, &path).unwrap();
    assert_eq!(attrs.band_count, 4);

    let reader = RasterReader::open(&path).unwrap();
    assert_eq!(reader.band_count(), 4);
    let back = reader.read_rgba().unwrap();
    assert_eq!(back.data, pixels);
    assert_eq!(back.pixel(19, 9), raster.pixel(19, 9));
    assert!(reader.read_grid().is_err());

    let half = reader.read_level_rgba(2).unwrap();
    assert_eq!(half.len(), 10 * 5 * 4);
    assert!(half.chunks(4).all(|px| px[3] == 255));
}

#[test]
fn test_existing_store_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.zarr");
    let w = writer(16, RasterCompression::Deflate);

    w.write_grid(&mercator_grid(vec![1.0; 100], 10, 10), &path).unwrap();
    w.write_grid(&mercator_grid(vec![2.0; 400], 20, 20), &path).unwrap();

    let reader = RasterReader::open(&path).unwrap();
    assert_eq!(reader.width(), 20);
    assert!(reader.read_grid().unwrap().data.iter().all(|v| *v == 2.0));

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_update_attributes_keeps_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.zarr");
    let mut grid = mercator_grid(create_test_grid(30, 30), 30, 30);
    grid.spatial_ref = SpatialRef::EngineeringUnknown("ENGCRS[\"Unknown engineering datum\"]".to_string());
    writer(16, RasterCompression::Deflate).write_grid(&grid, &path).unwrap();

    let chunks_before: BTreeMap<_, _> = read_all_files(&path)
        .into_iter()
        .filter(|(name, _)| !name.ends_with("zarr.json"))
        .collect();

    let updated = update_attributes(&path, |attrs| attrs.crs = SpatialRef::web_mercator().to_attribute()).unwrap();
    assert_eq!(updated.crs.as_deref(), Some("EPSG:3857"));

    let chunks_after: BTreeMap<_, _> = read_all_files(&path)
        .into_iter()
        .filter(|(name, _)| !name.ends_with("zarr.json"))
        .collect();
    assert!(!chunks_before.is_empty());
    assert_eq!(chunks_before, chunks_after);

    let reader = RasterReader::open(&path).unwrap();
    assert!(reader.spatial_ref().unwrap().is_web_mercator());
    assert_eq!(reader.read_grid().unwrap().data, grid.data);
}
