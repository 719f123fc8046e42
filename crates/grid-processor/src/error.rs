//! Error types for grid processing.

use thiserror::Error;

/// Errors that can occur during grid processing.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// Failed to open a raster store.
    #[error("failed to open raster: {0}")]
    OpenFailed(String),

    /// Failed to read data from a raster store.
    #[error("failed to read raster data: {0}")]
    ReadFailed(String),

    /// Failed to write a raster store.
    #[error("failed to write raster: {0}")]
    WriteFailed(String),

    /// Invalid metadata in a raster store.
    #[error("invalid raster metadata: {0}")]
    InvalidMetadata(String),

    /// Grid shape or contents not usable.
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The grid's spatial reference cannot be handled in memory.
    #[error("unsupported projection: {0}")]
    UnsupportedProjection(String),

    /// Projection error.
    #[error("projection error: {0}")]
    ProjectionError(String),
}

impl GridProcessorError {
    /// Create an OpenFailed error.
    pub fn open_failed(msg: impl Into<String>) -> Self {
        Self::OpenFailed(msg.into())
    }

    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }

    /// Create a WriteFailed error.
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Create a ZarrError.
    pub fn zarr_error(msg: impl Into<String>) -> Self {
        Self::ZarrError(msg.into())
    }

    /// True for errors caused by georeferencing rather than by the data.
    pub fn is_projection_error(&self) -> bool {
        matches!(self, Self::UnsupportedProjection(_) | Self::ProjectionError(_))
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

impl From<tile_common::TileCommonError> for GridProcessorError {
    fn from(err: tile_common::TileCommonError) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
