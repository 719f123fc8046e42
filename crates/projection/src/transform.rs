//! The projection seam shared by reprojection and tiling.

/// A map projection between geographic degrees and projected coordinates.
pub trait Projection: Send + Sync {
    /// (lon, lat) in degrees to projected (x, y).
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64);

    /// Projected (x, y) to (lon, lat) in degrees.
    fn inverse(&self, x: f64, y: f64) -> (f64, f64);
}

/// Plate carrée in degrees (EPSG:4326). Both directions are the identity,
/// apart from longitude wrapping on the way in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Geographic;

impl Projection for Geographic {
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        (normalize_longitude(lon), lat)
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }
}

/// Wrap a longitude into [-180, 180). 0..360 grids come out west-negative.
pub fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Project `(lon, lat)` with `from`'s inverse chained into `to`'s forward.
pub fn transform_point(from: &dyn Projection, to: &dyn Projection, x: f64, y: f64) -> (f64, f64) {
    let (lon, lat) = from.inverse(x, y);
    to.forward(lon, lat)
}
