//! Color-relief ramps.
//!
//! A ramp is an ordered list of `(threshold, r, g, b)` rows followed by one
//! no-data row that maps to fully transparent. Values between thresholds are
//! linearly interpolated (or snapped to the nearest row), values outside the
//! declared thresholds clamp to the first or last row.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::error::{RenderError, Result};

/// Parse hex color string to RGB. The leading `#` is optional.
pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }

    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

/// How values between two thresholds pick a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliefMode {
    /// Linear blend of the two surrounding rows.
    #[default]
    Interpolate,
    /// Color of the closest row.
    Nearest,
}

/// One row of a ramp table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RampRow {
    Value { threshold: f64, r: u8, g: u8, b: u8 },
    /// Always last; renders as `nv 0 0 0 0`.
    NoData,
}

/// Renderer-readable color ramp.
#[derive(Debug, Clone, PartialEq)]
pub struct RampTable {
    rows: Vec<RampRow>,
    stops: Vec<(f64, [u8; 3])>,
}

impl RampTable {
    /// Build from `(threshold, hex color)` stops in declared order.
    ///
    /// Thresholds must be finite and strictly increasing.
    pub fn from_stops<S: AsRef<str>>(stops: &[(f64, S)]) -> Result<Self> {
        if stops.is_empty() {
            return Err(RenderError::InvalidRamp("ramp has no color stops".to_string()));
        }

        let mut rows = Vec::with_capacity(stops.len() + 1);
        let mut previous: Option<f64> = None;
        for (threshold, color) in stops {
            let color = color.as_ref();
            if !threshold.is_finite() {
                return Err(RenderError::InvalidRamp(format!(
                    "threshold {} is not finite",
                    threshold
                )));
            }
            if let Some(prev) = previous {
                if *threshold <= prev {
                    return Err(RenderError::InvalidRamp(format!(
                        "threshold {} does not increase after {}",
                        threshold, prev
                    )));
                }
            }
            let (r, g, b) =
                hex_to_rgb(color).ok_or_else(|| RenderError::InvalidColor(color.to_string()))?;
            rows.push(RampRow::Value { threshold: *threshold, r, g, b });
            previous = Some(*threshold);
        }
        rows.push(RampRow::NoData);

        let stops = rows
            .iter()
            .filter_map(|row| match row {
                RampRow::Value { threshold, r, g, b } => Some((*threshold, [*r, *g, *b])),
                RampRow::NoData => None,
            })
            .collect();
        Ok(Self { rows, stops })
    }

    pub fn rows(&self) -> &[RampRow] {
        &self.rows
    }

    /// The `gdaldem color-relief` text form of this table.
    pub fn to_color_relief_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            match row {
                RampRow::Value { threshold, r, g, b } => {
                    let _ = writeln!(out, "{} {} {} {}", threshold, r, g, b);
                }
                RampRow::NoData => out.push_str("nv 0 0 0 0\n"),
            }
        }
        out
    }

    /// RGBA for one sample. `NaN` and `nodata` are fully transparent.
    pub fn color_for(&self, value: f32, nodata: Option<f32>, mode: ReliefMode) -> [u8; 4] {
        if value.is_nan() || nodata.is_some_and(|nd| value == nd) {
            return [0, 0, 0, 0];
        }
        let v = value as f64;
        let rows = &self.stops;
        let Some(&(first_t, first_c)) = rows.first() else {
            return [0, 0, 0, 0];
        };
        let &(last_t, last_c) = rows.last().unwrap_or(&(first_t, first_c));

        if v <= first_t {
            return opaque(first_c);
        }
        if v >= last_t {
            return opaque(last_c);
        }

        let upper = rows.iter().position(|(t, _)| *t >= v).unwrap_or(rows.len() - 1);
        let (t1, c1) = rows[upper];
        if t1 == v || upper == 0 {
            return opaque(c1);
        }
        let (t0, c0) = rows[upper - 1];

        match mode {
            ReliefMode::Nearest => {
                if v - t0 <= t1 - v {
                    opaque(c0)
                } else {
                    opaque(c1)
                }
            }
            ReliefMode::Interpolate => {
                let f = (v - t0) / (t1 - t0);
                let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
                [mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2]), 255]
            }
        }
    }
}

fn opaque(c: [u8; 3]) -> [u8; 4] {
    [c[0], c[1], c[2], 255]
}

/// Apply a ramp to a single-band grid, producing interleaved RGBA.
pub fn colorize(values: &[f32], nodata: Option<f32>, table: &RampTable, mode: ReliefMode) -> Vec<u8> {
    let mut rgba = vec![0u8; values.len() * 4];
    rgba.par_chunks_mut(4)
        .zip(values.par_iter())
        .for_each(|(px, &v)| px.copy_from_slice(&table.color_for(v, nodata, mode)));
    rgba
}
