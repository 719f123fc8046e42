//! Color relief and tile image encoding for weather rasters.
//!
//! - [`relief`]: threshold ramps turned into RGBA, with a transparent
//!   no-data row
//! - [`png`]: indexed/truecolor PNG encoder used for XYZ tiles

pub mod error;
pub mod png;
pub mod relief;

pub use error::{RenderError, Result};
pub use png::{encode_png, is_fully_transparent, DEFAULT_PNG_LEVEL};
pub use relief::{colorize, hex_to_rgb, RampRow, RampTable, ReliefMode};
