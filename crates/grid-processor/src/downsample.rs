//! Downsampling functions for overview levels.
//!
//! Overview dimensions round up (`ceil(width / factor)`), so the last
//! row/column of blocks may be partial; partial blocks average the pixels
//! they do have.

use serde::{Deserialize, Serialize};

/// Method used to downsample float grids.
///
/// - **Mean**: continuous data (temperature, humidity, pressure)
/// - **Max**: peak data (reflectivity, precipitation rate)
/// - **Nearest**: top-left sample of each block, preserves exact values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownsampleMethod {
    #[default]
    Mean,
    Max,
    Nearest,
}

/// Size of a level reduced by `factor`.
pub fn reduced_dims(width: usize, height: usize, factor: usize) -> (usize, usize) {
    (width.div_ceil(factor).max(1), height.div_ceil(factor).max(1))
}

/// Reduce a float grid by `factor` in each direction.
///
/// NaN and `nodata` samples are ignored. A block with no valid sample
/// becomes `nodata`, or NaN without one.
pub fn downsample_block(
    data: &[f32],
    width: usize,
    height: usize,
    factor: usize,
    method: DownsampleMethod,
    nodata: Option<f32>,
) -> (Vec<f32>, usize, usize) {
    let factor = factor.max(1);
    let (new_width, new_height) = reduced_dims(width, height, factor);
    let empty = nodata.unwrap_or(f32::NAN);
    let mut output = vec![empty; new_width * new_height];

    for out_y in 0..new_height {
        let y0 = out_y * factor;
        let y1 = (y0 + factor).min(height);
        for out_x in 0..new_width {
            let x0 = out_x * factor;
            let x1 = (x0 + factor).min(width);

            let block = (y0..y1)
                .flat_map(|y| (x0..x1).map(move |x| data[y * width + x]))
                .filter(|v| !v.is_nan() && nodata != Some(*v));
            let value = match method {
                DownsampleMethod::Mean => mean_of(block),
                DownsampleMethod::Max => max_of(block),
                DownsampleMethod::Nearest => Some(data[y0 * width + x0]),
            };
            output[out_y * new_width + out_x] = value.unwrap_or(empty);
        }
    }

    (output, new_width, new_height)
}

/// Downsample a 2D grid by a factor of 2.
pub fn downsample_2x(
    data: &[f32],
    width: usize,
    height: usize,
    method: DownsampleMethod,
) -> (Vec<f32>, usize, usize) {
    downsample_block(data, width, height, 2, method, None)
}

#[inline]
fn mean_of(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values.fold((0.0f64, 0u32), |(s, c), v| (s + v as f64, c + 1));
    (count > 0).then(|| (sum / count as f64) as f32)
}

#[inline]
fn max_of(values: impl Iterator<Item = f32>) -> Option<f32> {
    values.fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |m| m.max(v))))
}

/// Reduce an interleaved RGBA buffer by `factor`.
///
/// Alpha is the plain block mean. Color channels average only the pixels
/// with non-zero alpha so transparent surroundings do not darken edges.
pub fn downsample_rgba(
    data: &[u8],
    width: usize,
    height: usize,
    factor: usize,
) -> (Vec<u8>, usize, usize) {
    let factor = factor.max(1);
    let (new_width, new_height) = reduced_dims(width, height, factor);
    let mut output = vec![0u8; new_width * new_height * 4];

    for out_y in 0..new_height {
        let y0 = out_y * factor;
        let y1 = (y0 + factor).min(height);
        for out_x in 0..new_width {
            let x0 = out_x * factor;
            let x1 = (x0 + factor).min(width);

            let mut color = [0u32; 3];
            let mut alpha_sum = 0u32;
            let mut opaque = 0u32;
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    let px = &data[(y * width + x) * 4..(y * width + x) * 4 + 4];
                    count += 1;
                    alpha_sum += px[3] as u32;
                    if px[3] > 0 {
                        opaque += 1;
                        for c in 0..3 {
                            color[c] += px[c] as u32;
                        }
                    }
                }
            }

            let out = &mut output[(out_y * new_width + out_x) * 4..(out_y * new_width + out_x) * 4 + 4];
            if opaque > 0 {
                for c in 0..3 {
                    out[c] = ((color[c] as f32 / opaque as f32).round()) as u8;
                }
            }
            out[3] = ((alpha_sum as f32 / count as f32).round()) as u8;
        }
    }

    (output, new_width, new_height)
}

/// Source level for each requested overview factor.
///
/// Every factor is produced from the largest earlier factor that divides
/// it (or from full resolution), giving `(source_factor, factor)` pairs in
/// ascending order.
pub fn overview_plan(factors: &[u32]) -> Vec<(u32, u32)> {
    let mut sorted: Vec<u32> = factors.iter().copied().filter(|f| *f >= 2).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut plan = Vec::with_capacity(sorted.len());
    for (i, factor) in sorted.iter().enumerate() {
        let source = sorted[..i]
            .iter()
            .rev()
            .find(|prev| factor % **prev == 0)
            .copied()
            .unwrap_or(1);
        plan.push((source, *factor));
    }
    plan
}
