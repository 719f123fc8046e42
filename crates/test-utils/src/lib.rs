//! Shared test utilities for the weather tile workspace.
//!
//! - [`Grib2Builder`] writes small but valid GRIB2 messages.
//! - [`fixtures`] holds variable catalogs and an HRRR-like multi-band file.
//! - [`generators`] fills grids and RGBA buffers with known patterns.
//!
//! ```ignore
//! use test_utils::{write_hrrr_file, HRRR_CATALOG};
//!
//! let source = write_hrrr_file(dir.path(), 273.15);
//! let catalog = pipeline::Catalog::from_yaml_str(HRRR_CATALOG)?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod grib2;

pub use fixtures::{
    hrrr_bands, write_catalog, write_hrrr_file, CATALOG_WITH_UNDEFINED_RAMP, HRRR_CATALOG,
};
pub use generators::{
    create_grid_with_nans, create_temperature_grid, create_test_grid, create_test_rgba_pixels,
};
pub use grib2::{concat_messages, BuilderGrid, Grib2Builder};
