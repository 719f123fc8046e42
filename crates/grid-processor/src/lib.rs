//! Grid processing for the tile pipeline.
//!
//! Holds the in-memory raster types, resampling into Web Mercator and the
//! Zarr V3 raster store that sits between pipeline stages:
//!
//! ```text
//! decoded band ──► Grid ──► reproject_to_web_mercator ──► RasterWriter
//!                                                            │
//!                              data + overview_{2,4,..} ◄────┘
//!                                                            │
//!                                  RasterReader ◄────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_processor::{reproject_to_web_mercator, InterpolationMethod, RasterWriter};
//!
//! let mercator = reproject_to_web_mercator(&grid, InterpolationMethod::Bilinear, None)?;
//! RasterWriter::new(Default::default()).write_grid(&mercator, &out_path)?;
//! ```

pub mod config;
pub mod downsample;
pub mod error;
pub mod interpolation;
pub mod reader;
pub mod reproject;
pub mod types;
pub mod writer;

pub use config::{RasterCompression, RasterIoConfig, RasterWriteOptions};
pub use downsample::{downsample_block, downsample_rgba, overview_plan, DownsampleMethod};
pub use error::{GridProcessorError, Result};
pub use interpolation::{bilinear_interpolate, cubic_interpolate, nearest_interpolate, sample};
pub use reader::{update_attributes, RasterReader};
pub use reproject::{reproject_to_web_mercator, source_projection, web_mercator_footprint};
pub use types::{Grid, InterpolationMethod, RgbaRaster, UNIT_KEY};
pub use writer::{partial_path, replace_dir, write_atomic, RasterAttributes, RasterWriter};
