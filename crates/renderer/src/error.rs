//! Error types for ramp building and tile encoding.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// A color string that is not `#RRGGBB`.
    #[error("invalid color: {0}")]
    InvalidColor(String),

    /// Empty or unordered ramp.
    #[error("invalid color ramp: {0}")]
    InvalidRamp(String),

    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    /// PNG encoding failure.
    #[error("encode error: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
