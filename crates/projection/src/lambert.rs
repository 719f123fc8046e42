//! Lambert Conformal Conic projection (spherical).
//!
//! This projection is used by HRRR and NAM CONUS grids. Coordinates are
//! metres from the projection origin `(lat_0, lon_0)`, the same convention as
//! `+proj=lcc`.
//!
//! The projection parameters include:
//! - Latitude of origin (`lat_0`, LaD in GRIB2)
//! - Central meridian (`lon_0`, LoV in GRIB2)
//! - Standard parallels `lat_1` and `lat_2` (equal for a tangent cone)

use std::f64::consts::PI;

use tile_common::LccParams;

use crate::transform::Projection;

#[derive(Debug, Clone)]
pub struct LambertConformal {
    params: LccParams,
    /// Central meridian in radians
    lon0: f64,
    /// Cone constant
    n: f64,
    /// F constant
    f: f64,
    /// Rho at the latitude of origin
    rho0: f64,
}

impl LambertConformal {
    pub fn new(params: LccParams) -> Self {
        let to_rad = PI / 180.0;
        let latin1 = params.lat_1 * to_rad;
        let latin2 = params.lat_2 * to_rad;
        let lat0 = params.lat_0 * to_rad;

        let n = if (latin1 - latin2).abs() < 1e-10 {
            latin1.sin()
        } else {
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = (latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n)) / n;
        let rho0 = params.radius * f / (PI / 4.0 + lat0 / 2.0).tan().powf(n);

        Self {
            params,
            lon0: params.lon_0 * to_rad,
            n,
            f,
            rho0,
        }
    }

    /// HRRR CONUS projection: LoV 262.5E, both parallels and origin at 38.5N.
    pub fn hrrr() -> Self {
        Self::new(LccParams {
            lat_1: 38.5,
            lat_2: 38.5,
            lat_0: 38.5,
            lon_0: -97.5,
            radius: tile_common::crs::NCEP_EARTH_RADIUS,
        })
    }

    pub fn params(&self) -> &LccParams {
        &self.params
    }

    /// Cone constant `n`.
    pub fn cone_constant(&self) -> f64 {
        self.n
    }
}

/// Wrap an angle difference into [-PI, PI].
fn wrap_pi(mut a: f64) -> f64 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}

impl Projection for LambertConformal {
    fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let lat = lat_deg * to_rad;
        let dlon = wrap_pi(lon_deg * to_rad - self.lon0);

        let rho = self.params.radius * self.f / (PI / 4.0 + lat / 2.0).tan().powf(self.n);
        let theta = self.n * dlon;

        (rho * theta.sin(), self.rho0 - rho * theta.cos())
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;
        let sign = self.n.signum();

        let dy = self.rho0 - y;
        let rho = sign * (x * x + dy * dy).sqrt();
        let theta = (sign * x).atan2(sign * dy);

        let lat = if rho == 0.0 {
            sign * PI / 2.0
        } else {
            2.0 * ((self.params.radius * self.f / rho).powf(1.0 / self.n)).atan() - PI / 2.0
        };
        let lon = self.lon0 + theta / self.n;

        (lon * to_deg, lat * to_deg)
    }
}
