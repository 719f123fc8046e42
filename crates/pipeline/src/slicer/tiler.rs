//! XYZ PNG tile generation from a colorized Web Mercator raster.

use metrics::counter;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use grid_processor::{RasterIoConfig, RasterReader};
use renderer::{encode_png, is_fully_transparent, DEFAULT_PNG_LEVEL};
use tile_common::tile::tile_resolution;
use tile_common::{GeoTransform, TileCoord, TileRange, ZoomRange};

use super::copy_tree;
use crate::error::TilingError;

/// Edge length of a published tile, in pixels.
pub const TILE_SIZE: usize = 256;

const RAMDISK: &str = "/dev/shm";

/// Knobs for [`generate_tiles`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileOptions {
    /// Upper bound on tile rendering workers.
    pub processes: usize,
    /// Skip tiles with no visible pixel.
    pub exclude_transparent: bool,
    /// Keep tiles that already exist in the output directory.
    pub resume: bool,
    /// Deflate level for PNG output.
    pub png_level: u32,
    /// Render under `/dev/shm` and copy the finished tree out.
    pub use_ramdisk: bool,
    /// Publish into `{variable}/{run}/{hour}` (otherwise under the raster stem).
    pub organize: bool,
    pub io: RasterIoConfig,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            processes: 4,
            exclude_transparent: false,
            resume: false,
            png_level: DEFAULT_PNG_LEVEL,
            use_ramdisk: false,
            organize: true,
            io: RasterIoConfig::default(),
        }
    }
}

/// What [`generate_tiles`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileStats {
    pub written: usize,
    pub skipped_transparent: usize,
    pub skipped_existing: usize,
    /// Tiles written per zoom level.
    pub per_zoom: BTreeMap<u32, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileOutcome {
    Written,
    Transparent,
    Existing,
}

/// One decoded resolution level of the raster.
struct Level {
    factor: u32,
    rgba: Vec<u8>,
    width: usize,
    height: usize,
    transform: GeoTransform,
}

/// Decoded levels kept between zooms, bounded by a byte budget. The most
/// recently decoded level is always kept.
struct LevelCache<'a> {
    reader: &'a RasterReader,
    budget: usize,
    levels: Vec<Arc<Level>>,
}

impl<'a> LevelCache<'a> {
    fn new(reader: &'a RasterReader, budget: usize) -> Self {
        Self {
            reader,
            budget,
            levels: Vec::new(),
        }
    }

    fn get(&mut self, factor: u32) -> Result<Arc<Level>, TilingError> {
        if let Some(level) = self.levels.iter().find(|l| l.factor == factor) {
            return Ok(level.clone());
        }

        let rgba = self
            .reader
            .read_level_rgba(factor)
            .map_err(|e| TilingError::Generation(e.to_string()))?;
        let (width, height) = self.reader.level_dims(factor);
        let level = Arc::new(Level {
            factor,
            rgba,
            width,
            height,
            transform: self.reader.attributes().geotransform.scaled(factor as f64),
        });
        debug!(factor, width, height, "Decoded raster level");

        self.levels.push(level.clone());
        while self.levels.len() > 1 && self.bytes() > self.budget {
            let evicted = self.levels.remove(0);
            debug!(factor = evicted.factor, "Evicted raster level");
        }
        Ok(level)
    }

    fn bytes(&self) -> usize {
        self.levels.iter().map(|l| l.rgba.len()).sum()
    }
}

/// The coarsest level whose pixels are no larger than a tile pixel at `z`.
fn level_for_zoom(base_resolution: f64, factors: &[u32], z: u32) -> u32 {
    let target = tile_resolution(z, TILE_SIZE as u32);
    factors
        .iter()
        .copied()
        .filter(|f| base_resolution * *f as f64 <= target * (1.0 + 1e-9))
        .max()
        .unwrap_or(1)
}

/// Source cells overlapped by each of `n` output cells of `step` source
/// units starting at `start`, with the overlap length.
fn axis_weights(start: f64, step: f64, n: usize, limit: usize) -> Vec<Vec<(usize, f64)>> {
    (0..n)
        .map(|i| {
            let a = start + i as f64 * step;
            let b = a + step;
            let first = a.floor().max(0.0) as usize;
            let last = (b.ceil().min(limit as f64)).max(0.0) as usize;
            (first..last)
                .filter_map(|j| {
                    let w = b.min(j as f64 + 1.0) - a.max(j as f64);
                    (w > 0.0).then_some((j, w))
                })
                .collect()
        })
        .collect()
}

/// Area-weighted RGBA resampling of `level` into one tile. Color is
/// averaged with premultiplied alpha; tile area outside the raster counts
/// as transparent.
fn render_tile(level: &Level, coord: TileCoord) -> Vec<u8> {
    let bounds = coord.mercator_bounds();
    let gt = &level.transform;
    let col_step = (bounds.width() / TILE_SIZE as f64) / gt.pixel_width();
    let row_step = (bounds.height() / TILE_SIZE as f64) / gt.pixel_height().abs();
    let col_start = (bounds.min_x - gt.origin_x()) / gt.pixel_width();
    let row_start = (gt.origin_y() - bounds.max_y) / gt.pixel_height().abs();

    let cols = axis_weights(col_start, col_step, TILE_SIZE, level.width);
    let rows = axis_weights(row_start, row_step, TILE_SIZE, level.height);
    let area = col_step * row_step;

    let mut out = vec![0u8; TILE_SIZE * TILE_SIZE * 4];
    for (ty, row_w) in rows.iter().enumerate() {
        if row_w.is_empty() {
            continue;
        }
        for (tx, col_w) in cols.iter().enumerate() {
            let mut acc = [0.0f64; 4];
            for &(sr, wy) in row_w {
                let row_base = sr * level.width;
                for &(sc, wx) in col_w {
                    let i = (row_base + sc) * 4;
                    let px = &level.rgba[i..i + 4];
                    let a = px[3] as f64 * wx * wy;
                    if a == 0.0 {
                        continue;
                    }
                    acc[0] += px[0] as f64 * a;
                    acc[1] += px[1] as f64 * a;
                    acc[2] += px[2] as f64 * a;
                    acc[3] += a;
                }
            }
            if acc[3] <= 0.0 {
                continue;
            }
            let o = (ty * TILE_SIZE + tx) * 4;
            let to_u8 = |v: f64| v.round().clamp(0.0, 255.0) as u8;
            out[o] = to_u8(acc[0] / acc[3]);
            out[o + 1] = to_u8(acc[1] / acc[3]);
            out[o + 2] = to_u8(acc[2] / acc[3]);
            out[o + 3] = to_u8(acc[3] / area);
        }
    }
    out
}

fn write_tile(
    level: &Level,
    coord: TileCoord,
    work_dir: &Path,
    out_dir: &Path,
    options: &TileOptions,
) -> Result<TileOutcome, TilingError> {
    let relative = coord.relative_path();
    if options.resume && out_dir.join(&relative).exists() {
        return Ok(TileOutcome::Existing);
    }

    let pixels = render_tile(level, coord);
    if options.exclude_transparent && is_fully_transparent(&pixels) {
        return Ok(TileOutcome::Transparent);
    }

    let png = encode_png(&pixels, TILE_SIZE, TILE_SIZE, options.png_level)
        .map_err(|e| TilingError::Generation(format!("tile {}: {}", coord, e)))?;
    let path = work_dir.join(&relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| TilingError::Generation(format!("{}: {}", parent.display(), e)))?;
    }
    fs::write(&path, png).map_err(|e| TilingError::Generation(format!("{}: {}", path.display(), e)))?;
    Ok(TileOutcome::Written)
}

fn ramdisk_dir() -> Result<tempfile::TempDir, TilingError> {
    let base = Path::new(RAMDISK);
    let base: PathBuf = if base.is_dir() {
        base.to_path_buf()
    } else {
        std::env::temp_dir()
    };
    tempfile::Builder::new()
        .prefix("tiles-")
        .tempdir_in(&base)
        .map_err(|e| TilingError::Generation(format!("ramdisk {}: {}", base.display(), e)))
}

/// Render every tile of `zoom` that intersects the raster into
/// `out_dir/{z}/{x}/{y}.png`.
///
/// The raster must be a 4-band EPSG:3857 store (see
/// [`check_srs`](super::check_srs)).
pub fn generate_tiles(
    raster: &Path,
    out_dir: &Path,
    zoom: ZoomRange,
    options: &TileOptions,
) -> Result<TileStats, TilingError> {
    let reader = RasterReader::open(raster).map_err(|e| TilingError::Generation(e.to_string()))?;
    if reader.band_count() != 4 {
        return Err(TilingError::Generation(format!(
            "{} has {} bands, expected RGBA",
            raster.display(),
            reader.band_count()
        )));
    }
    let srs = reader
        .spatial_ref()
        .map_err(|e| TilingError::Generation(e.to_string()))?;
    if !srs.is_web_mercator() {
        return Err(TilingError::Generation(format!(
            "{} is in {}, expected EPSG:3857",
            raster.display(),
            srs
        )));
    }
    options
        .io
        .validate()
        .map_err(TilingError::Generation)?;

    let pool = options
        .io
        .thread_pool(Some(options.processes.max(1)))
        .map_err(|e| TilingError::Generation(e.to_string()))?;

    let attrs = reader.attributes();
    let footprint = attrs.geotransform.bounds(reader.width(), reader.height());
    let base_resolution = attrs.geotransform.pixel_width().abs();
    let mut factors = vec![1u32];
    factors.extend(attrs.overview_factors.iter().copied());

    let ramdisk = if options.use_ramdisk {
        Some(ramdisk_dir()?)
    } else {
        None
    };
    let work_dir = ramdisk.as_ref().map_or(out_dir, |d| d.path());
    fs::create_dir_all(out_dir).map_err(|e| TilingError::Generation(e.to_string()))?;

    info!(
        raster = %raster.display(),
        zoom = %zoom,
        processes = options.processes,
        ramdisk = options.use_ramdisk,
        "Generating tiles"
    );

    let mut cache = LevelCache::new(&reader, options.io.cache_bytes());
    let mut stats = TileStats::default();

    for z in zoom.levels() {
        let Some(range) = TileRange::covering(&footprint, z) else {
            stats.per_zoom.insert(z, 0);
            continue;
        };
        let factor = level_for_zoom(base_resolution, &factors, z);
        let level = cache.get(factor)?;
        let coords: Vec<TileCoord> = range.iter().collect();

        let outcomes = pool.install(|| {
            coords
                .par_iter()
                .map(|coord| write_tile(&level, *coord, work_dir, out_dir, options))
                .collect::<Result<Vec<_>, TilingError>>()
        })?;

        let written = outcomes.iter().filter(|o| **o == TileOutcome::Written).count();
        stats.written += written;
        stats.skipped_transparent += outcomes.iter().filter(|o| **o == TileOutcome::Transparent).count();
        stats.skipped_existing += outcomes.iter().filter(|o| **o == TileOutcome::Existing).count();
        stats.per_zoom.insert(z, written);
        counter!("tiles_written_total").increment(written as u64);

        debug!(z, factor, tiles = coords.len(), written, "Zoom level done");
    }

    if let Some(ramdisk) = &ramdisk {
        copy_tree(ramdisk.path(), out_dir)
            .map_err(|e| TilingError::Generation(format!("copying from ramdisk: {}", e)))?;
    }

    info!(
        raster = %raster.display(),
        written = stats.written,
        skipped_transparent = stats.skipped_transparent,
        skipped_existing = stats.skipped_existing,
        "Tile generation complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_processor::{RasterWriteOptions, RasterWriter, RgbaRaster};
    use tile_common::{BoundingBox, SpatialRef};

    /// A raster covering exactly the north-west quadrant of the world
    /// (tile 1/0/0), left half opaque red, right half transparent.
    fn quadrant_raster(dir: &Path, srs: SpatialRef) -> PathBuf {
        let e = tile_common::WEB_MERCATOR_EXTENT;
        let (w, h) = (64, 64);
        let gt = GeoTransform::from_bounds(&BoundingBox::new(-e, 0.0, 0.0, e), w, h);
        let mut data = vec![0u8; w * h * 4];
        for row in 0..h {
            for col in 0..w / 2 {
                let i = (row * w + col) * 4;
                data[i..i + 4].copy_from_slice(&[255, 0, 0, 255]);
            }
        }
        let path = dir.join("quadrant.zarr");
        RasterWriter::new(RasterWriteOptions {
            overview_factors: vec![2, 4],
            tile_size: 32,
            ..Default::default()
        })
        .write_rgba(&RgbaRaster::new(data, w, h, srs, gt).unwrap(), &path)
        .unwrap();
        path
    }

    fn decode(path: &Path) -> image::RgbaImage {
        image::open(path).unwrap().to_rgba8()
    }

    #[test]
    fn test_level_for_zoom() {
        let factors = [1, 2, 4, 8];
        // 1 km pixels: zoom 0 tile pixels are ~156 km
        assert_eq!(level_for_zoom(1000.0, &factors, 0), 8);
        // zoom 8 is ~611 m per pixel, finer than the raster
        assert_eq!(level_for_zoom(1000.0, &factors, 8), 1);
        // zoom 6 is ~2446 m: factor 2 fits, 4 would be coarser
        assert_eq!(level_for_zoom(1000.0, &factors, 6), 2);
    }

    #[test]
    fn test_axis_weights() {
        let w = axis_weights(0.5, 1.0, 3, 3);
        assert_eq!(w[0], vec![(0, 0.5), (1, 0.5)]);
        assert_eq!(w[2], vec![(2, 0.5)]);

        let outside = axis_weights(-5.0, 1.0, 2, 3);
        assert!(outside.iter().all(|v| v.is_empty()));
    }

    #[test]
    fn test_generate_tiles_layout_and_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let raster = quadrant_raster(dir.path(), SpatialRef::web_mercator());
        let out = dir.path().join("tiles");

        let stats = generate_tiles(&raster, &out, "0-2".parse().unwrap(), &TileOptions::default()).unwrap();

        // z0: 1 tile, z1: the NW tile only, z2: 2x2 tiles in the NW quadrant
        assert_eq!(stats.per_zoom, BTreeMap::from([(0, 1), (1, 1), (2, 4)]));
        assert_eq!(stats.written, 6);
        assert!(out.join("1/0/0.png").exists());
        assert!(!out.join("1/1/0.png").exists());
        assert!(out.join("2/1/1.png").exists());
        assert!(!out.join("2/2/0.png").exists());

        let z1 = decode(&out.join("1/0/0.png"));
        assert_eq!(z1.dimensions(), (256, 256));
        assert_eq!(z1.get_pixel(10, 10).0, [255, 0, 0, 255]);
        assert_eq!(z1.get_pixel(200, 10).0[3], 0);

        // At zoom 0 the raster fills the top-left quarter of the tile
        let z0 = decode(&out.join("0/0/0.png"));
        assert_eq!(z0.get_pixel(10, 10).0, [255, 0, 0, 255]);
        assert_eq!(z0.get_pixel(200, 200).0[3], 0);
    }

    #[test]
    fn test_exclude_transparent_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let raster = quadrant_raster(dir.path(), SpatialRef::web_mercator());
        let out = dir.path().join("tiles");

        let options = TileOptions {
            exclude_transparent: true,
            processes: 2,
            ..Default::default()
        };
        let stats = generate_tiles(&raster, &out, "2".parse().unwrap(), &options).unwrap();
        // Right column of the quadrant (x = 1) is fully transparent
        assert_eq!(stats.written, 2);
        assert_eq!(stats.skipped_transparent, 2);
        assert!(!out.join("2/1/0.png").exists());

        let resume = TileOptions {
            resume: true,
            ..options
        };
        let again = generate_tiles(&raster, &out, "2".parse().unwrap(), &resume).unwrap();
        assert_eq!(again.written, 0);
        assert_eq!(again.skipped_existing, 2);
    }

    #[test]
    fn test_ramdisk_output_lands_in_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let raster = quadrant_raster(dir.path(), SpatialRef::web_mercator());
        let out = dir.path().join("tiles");
        let options = TileOptions {
            use_ramdisk: true,
            ..Default::default()
        };
        let stats = generate_tiles(&raster, &out, "1".parse().unwrap(), &options).unwrap();
        assert_eq!(stats.written, 1);
        assert!(out.join("1/0/0.png").exists());
    }

    #[test]
    fn test_rejects_non_mercator_raster() {
        let dir = tempfile::tempdir().unwrap();
        let raster = quadrant_raster(dir.path(), SpatialRef::Missing);
        let err = generate_tiles(&raster, &dir.path().join("t"), ZoomRange::default(), &TileOptions::default())
            .unwrap_err();
        assert!(matches!(err, TilingError::Generation(_)));
    }
}
