//! Error types for the shared geo types.

use thiserror::Error;

/// Result type alias using TileCommonError.
pub type TileCommonResult<T> = Result<T, TileCommonError>;

#[derive(Debug, Error)]
pub enum TileCommonError {
    #[error("Invalid zoom range '{0}': expected 'min-max' or a single level")]
    InvalidZoomRange(String),

    #[error("Zoom level {0} exceeds the maximum of {max}", max = crate::tile::MAX_ZOOM)]
    ZoomTooDeep(u32),

    #[error("Invalid spatial reference: {0}")]
    InvalidSpatialRef(String),

    #[error("Invalid geotransform: {0}")]
    InvalidGeoTransform(String),
}
