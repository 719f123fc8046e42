//! Spherical Web Mercator (EPSG:3857).

use std::f64::consts::PI;

use tile_common::WEB_MERCATOR_EXTENT;

use crate::transform::Projection;

/// Semi-major axis of WGS84, the sphere radius used by Web Mercator.
pub const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude at which Web Mercator y reaches the square's edge.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl Projection for WebMercator {
    /// Latitudes beyond [`MAX_LATITUDE`] clamp to the square's edge.
    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let x = WEB_MERCATOR_RADIUS * lon.to_radians();
        let y = WEB_MERCATOR_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
        (x, y.clamp(-WEB_MERCATOR_EXTENT, WEB_MERCATOR_EXTENT))
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
        let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        (lon, lat)
    }
}
