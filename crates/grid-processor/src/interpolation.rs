//! Interpolation methods for grid resampling.
//!
//! Positions are fractional sample indices: `(0.0, 0.0)` is the center of
//! the first pixel, `(width - 1, height - 1)` the center of the last.

use crate::types::InterpolationMethod;

/// Sample `data` at a fractional index with the given method.
///
/// Positions are clamped into the grid first, so callers decide what lies
/// outside the footprint.
pub fn sample(
    data: &[f32],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
    method: InterpolationMethod,
) -> f32 {
    if width == 0 || height == 0 || x.is_nan() || y.is_nan() {
        return f32::NAN;
    }
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    match method {
        InterpolationMethod::Nearest => nearest_interpolate(data, width, height, x, y),
        InterpolationMethod::Bilinear | InterpolationMethod::Average => {
            bilinear_interpolate(data, width, height, x, y)
        }
        InterpolationMethod::Cubic => cubic_interpolate(data, width, height, x, y),
    }
}

/// Nearest neighbor interpolation.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if x < -0.5 || y < -0.5 {
        return f32::NAN;
    }
    let col = x.round() as usize;
    let row = y.round() as usize;

    if col >= width || row >= height {
        return f32::NAN;
    }

    data[row * width + col]
}

/// Bilinear interpolation between the four nearest samples.
///
/// NaN corners with zero weight are ignored; a NaN with any weight makes the
/// result NaN.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if x < 0.0 || y < 0.0 {
        return f32::NAN;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    if x0 >= width || y0 >= height {
        return f32::NAN;
    }
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = x - x0 as f64;
    let yf = y - y0 as f64;

    let corners = [
        (data[y0 * width + x0], (1.0 - xf) * (1.0 - yf)),
        (data[y0 * width + x1], xf * (1.0 - yf)),
        (data[y1 * width + x0], (1.0 - xf) * yf),
        (data[y1 * width + x1], xf * yf),
    ];

    let mut acc = 0.0f64;
    for (value, weight) in corners {
        if weight == 0.0 {
            continue;
        }
        if value.is_nan() {
            return f32::NAN;
        }
        acc += value as f64 * weight;
    }
    acc as f32
}

/// Bicubic (Catmull-Rom) interpolation over the 4x4 neighborhood.
///
/// Falls back to bilinear when the neighborhood holds a NaN.
pub fn cubic_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;
    let xf = x - xi as f64;
    let yf = y - yi as f64;

    let mut values = [[0.0f64; 4]; 4];
    for (j, row) in values.iter_mut().enumerate() {
        for (i, slot) in row.iter_mut().enumerate() {
            let px = (xi + i as i64 - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j as i64 - 1).clamp(0, height as i64 - 1) as usize;
            let v = data[py * width + px];
            if v.is_nan() {
                return bilinear_interpolate(data, width, height, x, y);
            }
            *slot = v as f64;
        }
    }

    let rows = values.map(|r| cubic_1d(r[0], r[1], r[2], r[3], xf));
    cubic_1d(rows[0], rows[1], rows[2], rows[3], yf) as f32
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}
