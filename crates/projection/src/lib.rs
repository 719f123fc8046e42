//! Coordinate reference system transformations.
//!
//! Implements the handful of map projections the pipeline needs from scratch:
//! geographic lat/lon, spherical Web Mercator and Lambert Conformal Conic.

pub mod lambert;
pub mod mercator;
pub mod transform;

pub use lambert::LambertConformal;
pub use mercator::{WebMercator, MAX_LATITUDE, WEB_MERCATOR_RADIUS};
pub use transform::{normalize_longitude, transform_point, Geographic, Projection};
