//! Catalog-driven pipeline from GRIB2 model output to XYZ map tiles.
//!
//! ```text
//! GRIB2 ─► find_band ─► extract ─► apply_if_needed ─► reproject ─► write_tiled
//!                                                                      │
//!   tiles/{var}/{run}/{hour}/{z}/{x}/{y}.png ◄─ tile_file ◄─ colorize_file
//! ```
//!
//! The [`Catalog`] (a YAML file) says which bands to pull, how to convert
//! their units and which color ramp renders them. Stages pass data
//! through tiled raster stores written by `grid_processor`.
//!
//! # Example
//!
//! ```ignore
//! use pipeline::{process_file, resolve_variables, Catalog, ProcessOptions};
//!
//! let catalog = Catalog::load("config/variables.yaml")?;
//! let variables = resolve_variables(&catalog, None);
//! let outcome = process_file(&source, &variables, &catalog, &out_dir, &ProcessOptions::default())?;
//! ```

pub mod api;
pub mod catalog;
pub mod colorize;
pub mod convert;
pub mod error;
pub mod naming;
pub mod resolver;
pub mod slicer;
pub mod summary;
pub mod transform;
pub mod warp;

pub use api::{
    colorize_file, process_file, resolve_variables, select_variables, tile_file, ProcessOptions,
    ProcessOutcome,
};
pub use catalog::{Catalog, ColorRamp, ProcessingConfig, ValidationIssue, VariableDefinition};
pub use convert::{apply_if_needed, ConversionOutcome};
pub use error::{
    ColorError, ConfigurationError, ConversionError, EvalError, PipelineError, ResolutionError,
    Result, TilingError, TransformError,
};
pub use naming::FileNameInfo;
pub use resolver::find_band;
pub use slicer::{check_srs, generate_tiles, organize, repair_srs, SrsStatus, TileOptions, TileStats};
pub use summary::{BatchSummary, Stage};
pub use warp::{GdalWarp, WarpBackend};
