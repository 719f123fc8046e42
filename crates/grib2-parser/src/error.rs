//! Error types for GRIB2 decoding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Section {section} missing before data section {field}")]
    MissingSection { section: u8, field: usize },

    #[error("Unsupported grid definition template 3.{0}")]
    UnsupportedGridTemplate(u16),

    #[error("Unpacking failed: {0}")]
    UnpackingError(String),

    #[error("Band {index} out of range (file has {count} bands)")]
    BandOutOfRange { index: usize, count: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Grib2Error>;
