//! Zarr V3 writer for float grids and RGBA rasters.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::codec::BytesToBytesCodecTraits;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use super::{overview_node, write_atomic, RasterAttributes, DATA_NODE};
use crate::config::{RasterCompression, RasterWriteOptions};
use crate::downsample::{downsample_block, downsample_rgba, overview_plan, DownsampleMethod};
use crate::error::{GridProcessorError, Result};
use crate::types::{Grid, RgbaRaster};

/// One resolution level held in memory while a store is written.
enum Level {
    Float(Vec<f32>),
    Rgba(Vec<u8>),
}

impl Level {
    fn band_count(&self) -> usize {
        match self {
            Level::Float(_) => 1,
            Level::Rgba(_) => 4,
        }
    }

    fn reduce(&self, width: usize, height: usize, factor: usize, nodata: Option<f32>) -> (Level, usize, usize) {
        match self {
            Level::Float(data) => {
                let (out, w, h) =
                    downsample_block(data, width, height, factor, DownsampleMethod::Mean, nodata);
                (Level::Float(out), w, h)
            }
            Level::Rgba(data) => {
                let (out, w, h) = downsample_rgba(data, width, height, factor);
                (Level::Rgba(out), w, h)
            }
        }
    }
}

/// Writes raster stores with the configured tiling, compression and
/// overview factors.
pub struct RasterWriter {
    options: RasterWriteOptions,
}

impl RasterWriter {
    pub fn new(options: RasterWriteOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RasterWriteOptions {
        &self.options
    }

    /// Write a single-band float grid. NaN is the fill value; a nodata
    /// sentinel on the grid is recorded in the attributes.
    pub fn write_grid(&self, grid: &Grid, path: &Path) -> Result<RasterAttributes> {
        let mut attrs = self.base_attributes(grid, 1);
        attrs.nodata = grid.nodata;
        attrs.metadata = grid.metadata.clone();
        self.write_levels(path, Level::Float(grid.data.clone()), grid.width, grid.height, attrs)
    }

    /// Write an interleaved RGBA raster as a `[rows, cols, 4]` array.
    pub fn write_rgba(&self, raster: &RgbaRaster, path: &Path) -> Result<RasterAttributes> {
        let mut attrs = RasterAttributes::new(&raster.spatial_ref, raster.transform, 4);
        attrs.metadata = raster.metadata.clone();
        self.apply_options(&mut attrs);
        self.write_levels(path, Level::Rgba(raster.data.clone()), raster.width, raster.height, attrs)
    }

    fn base_attributes(&self, grid: &Grid, band_count: usize) -> RasterAttributes {
        let mut attrs = RasterAttributes::new(&grid.spatial_ref, grid.transform, band_count);
        self.apply_options(&mut attrs);
        attrs
    }

    fn apply_options(&self, attrs: &mut RasterAttributes) {
        attrs.tile_size = self.options.tile_size;
        attrs.compression = self.options.compression;
    }

    fn write_levels(
        &self,
        path: &Path,
        full: Level,
        width: usize,
        height: usize,
        mut attrs: RasterAttributes,
    ) -> Result<RasterAttributes> {
        self.options.validate()?;

        // Overviews that would collapse below one pixel in both directions
        // carry no information.
        let plan: Vec<(u32, u32)> = overview_plan(&self.options.overview_factors)
            .into_iter()
            .filter(|(_, factor)| (*factor as usize) < width.max(height))
            .collect();
        attrs.overview_factors = plan.iter().map(|(_, f)| *f).collect();
        let nodata = attrs.nodata;

        write_atomic(path, |staging| {
            let store = Arc::new(
                FilesystemStore::new(staging).map_err(|e| GridProcessorError::open_failed(e.to_string()))?,
            );

            self.store_level(&store, DATA_NODE, &full, width, height, Some(&attrs))?;

            let mut levels: Vec<(u32, Level, usize, usize)> = Vec::with_capacity(plan.len());
            for (source_factor, factor) in &plan {
                let (reduced, w, h) = if *source_factor == 1 {
                    full.reduce(width, height, *factor as usize, nodata)
                } else {
                    let (_, src, sw, sh) = levels
                        .iter()
                        .find(|(f, ..)| f == source_factor)
                        .ok_or_else(|| GridProcessorError::write_failed("overview source level missing"))?;
                    src.reduce(*sw, *sh, (factor / source_factor) as usize, nodata)
                };
                debug!(factor, width = w, height = h, "Writing overview");
                self.store_level(&store, &overview_node(*factor), &reduced, w, h, None)?;
                levels.push((*factor, reduced, w, h));
            }
            Ok(())
        })?;

        info!(
            path = %path.display(),
            width,
            height,
            bands = attrs.band_count,
            overviews = ?attrs.overview_factors,
            compression = %attrs.compression,
            "Wrote raster store"
        );
        Ok(attrs)
    }

    fn store_level(
        &self,
        store: &Arc<FilesystemStore>,
        node: &str,
        level: &Level,
        width: usize,
        height: usize,
        attrs: Option<&RasterAttributes>,
    ) -> Result<()> {
        let tile = self.options.tile_size.max(1);
        let chunk_rows = tile.min(height) as u64;
        let chunk_cols = tile.min(width) as u64;

        let (shape, chunks, data_type, fill) = match level {
            Level::Float(_) => (
                vec![height as u64, width as u64],
                vec![chunk_rows, chunk_cols],
                DataType::Float32,
                FillValue::from(f32::NAN),
            ),
            Level::Rgba(_) => (
                vec![height as u64, width as u64, 4],
                vec![chunk_rows, chunk_cols, 4],
                DataType::UInt8,
                FillValue::from(0u8),
            ),
        };
        let chunk_grid: zarrs::array::ChunkGrid = chunks
            .try_into()
            .map_err(|e| GridProcessorError::ConfigError(format!("{:?}", e)))?;

        let attributes = match attrs {
            Some(a) => a.to_json_map()?,
            None => serde_json::Map::new(),
        };

        let mut binding = ArrayBuilder::new(shape.clone(), data_type, chunk_grid, fill);
        let mut builder = binding.attributes(attributes);
        if let Some(codec) = self.compression_codec(level.band_count())? {
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }
        let array: Array<FilesystemStore> = builder
            .build(store.clone(), node)
            .map_err(|e| GridProcessorError::zarr_error(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;

        let start = vec![0u64; shape.len()];
        let subset = ArraySubset::new_with_start_shape(start, shape)
            .map_err(|e| GridProcessorError::write_failed(e.to_string()))?;

        match level {
            Level::Float(data) => array.store_array_subset_elements::<f32>(&subset, data),
            Level::Rgba(data) => array.store_array_subset_elements::<u8>(&subset, data),
        }
        .map_err(|e| GridProcessorError::write_failed(e.to_string()))
    }

    /// Blosc codec for the configured compression, `None` when disabled.
    fn compression_codec(&self, band_count: usize) -> Result<Option<Arc<dyn BytesToBytesCodecTraits>>> {
        let compressor = match self.options.compression {
            RasterCompression::None => return Ok(None),
            RasterCompression::Deflate => BloscCompressor::Zlib,
            RasterCompression::Lz4 => BloscCompressor::LZ4,
            RasterCompression::Zstd => BloscCompressor::Zstd,
        };

        let level = BloscCompressionLevel::try_from(self.options.compression_level)
            .map_err(|_| GridProcessorError::ConfigError("Invalid compression level".to_string()))?;

        // Byte shuffling only helps multi-byte samples.
        let (shuffle, typesize) = if band_count == 1 {
            (BloscShuffleMode::Shuffle, Some(4))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridProcessorError::ConfigError(e.to_string()))?;
        Ok(Some(Arc::new(codec)))
    }
}
