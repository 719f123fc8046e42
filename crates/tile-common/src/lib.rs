//! Geo types shared across the weather tile pipeline.
//!
//! Bounding boxes, spatial references, affine geotransforms and the
//! XYZ tile scheme used for published tile pyramids.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod geotransform;
pub mod tile;

pub use bbox::BoundingBox;
pub use crs::{LccParams, SpatialRef, WEB_MERCATOR_EPSG};
pub use error::{TileCommonError, TileCommonResult};
pub use geotransform::GeoTransform;
pub use tile::{TileCoord, TileRange, ZoomRange, WEB_MERCATOR_EXTENT};
