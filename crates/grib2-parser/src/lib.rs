//! GRIB2 parser implementation (WMO FM 92 GRIB Edition 2).
//!
//! Presents a GRIB2 file as a list of bands, each carrying decoded values and
//! element/level metadata:
//!
//! ```no_run
//! use grib2_parser::Grib2File;
//!
//! let file = Grib2File::open("hrrr.t12z.wrfsfcf06.grib2")?;
//! for (index, band) in file.bands() {
//!     let md = band.metadata(file.tables());
//!     println!("{} {} {}", index, md["GRIB_ELEMENT"], md["GRIB_SHORT_NAME"]);
//! }
//! # Ok::<(), grib2_parser::Grib2Error>(())
//! ```

pub mod error;
pub mod reader;
pub mod sections;
pub mod tables;
pub mod unpacking;

pub use error::{Grib2Error, Result};
pub use reader::{Grib2File, Grib2Message};
pub use sections::{GridDefinition, GridTemplate, LambertGrid, LatLonGrid, PolarStereoGrid};
pub use tables::{Grib2Tables, LevelInfo, ParameterInfo};
