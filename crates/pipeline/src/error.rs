//! Error types for the tile pipeline.
//!
//! One enum per stage, all wrapped by [`PipelineError`] so callers can
//! match on the stage that failed or just print the message.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::ValidationIssue;

/// Problems with the variable catalog itself.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Failed to parse configuration {}: {message}", path.display())]
    ConfigParseError { path: PathBuf, message: String },

    #[error("Invalid catalog ({} issues): {}", .0.len(), join_issues(.0))]
    InvalidCatalog(Vec<ValidationIssue>),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Locating a band inside a source file.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("No band matches '{pattern}' ({} bands inspected)", inspected.len())]
    NotFound {
        pattern: String,
        /// `ELEMENT/SHORT_NAME` of every band looked at, in file order.
        inspected: Vec<String>,
    },

    #[error("Failed to read source {}: {message}", path.display())]
    SourceUnreadable { path: PathBuf, message: String },
}

/// Applying unit conversion formulas.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion not found: {0}")]
    ConversionNotFound(String),

    #[error("No formula for conversion: {0}")]
    ConversionFormulaMissing(String),

    #[error("Error applying conversion {name}: {source}")]
    ConversionEvaluationError {
        name: String,
        #[source]
        source: EvalError,
    },

    #[error("Invalid formula '{formula}': {message}")]
    FormulaParse { formula: String, message: String },
}

/// A formula that gave no usable number for one sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("'{formula}' is not finite for value {value}")]
    NonFinite { formula: String, value: f64 },
}

/// Extraction, reprojection and raster store I/O.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Unsupported grid: {0}")]
    UnsupportedGrid(String),

    #[error("Failed to decode band: {0}")]
    Decode(String),

    #[error(
        "Reprojection failed: {primary}; fallback: {}",
        fallback.as_deref().unwrap_or("not attempted")
    )]
    Reproject {
        primary: String,
        fallback: Option<String>,
    },

    #[error("External warp failed: {0}")]
    WarpFailed(String),

    #[error("Failed to write raster {}: {message}", path.display())]
    RasterWrite { path: PathBuf, message: String },

    #[error("Failed to read raster {}: {message}", path.display())]
    RasterRead { path: PathBuf, message: String },
}

/// Slicing a colored raster into published tiles.
#[derive(Error, Debug)]
pub enum TilingError {
    #[error("Invalid zoom range: {0}")]
    InvalidZoomRange(String),

    #[error("Cannot parse raster name: {0}")]
    UnparseableName(String),

    #[error("Failed to repair spatial reference of {}: {message}", path.display())]
    SrsRepair { path: PathBuf, message: String },

    #[error("Tile generation failed: {0}")]
    Generation(String),

    #[error("Failed to organize tiles: {0}")]
    Organize(String),
}

/// Color ramp lookup and colorization.
#[derive(Error, Debug)]
pub enum ColorError {
    #[error("Variable '{variable}' references undefined color ramp: {ramp}")]
    UndefinedRamp { variable: String, ramp: String },

    #[error("Variable '{0}' has no color ramp")]
    NoRamp(String),

    #[error("Color ramp '{ramp}' is invalid: {message}")]
    InvalidRamp { ramp: String, message: String },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

/// Any pipeline failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Tiling(#[from] TilingError),

    #[error(transparent)]
    Color(#[from] ColorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
