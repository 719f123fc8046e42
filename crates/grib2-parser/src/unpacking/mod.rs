//! GRIB2 data unpacking.
//!
//! Simple packing (template 5.0) is decoded here. Other templates are handed
//! to the `grib` crate by the reader.

use crate::Grib2Error;

/// Unpack simple packed GRIB2 data.
///
/// `Y = (R + X * 2^E) / 10^D`. Points the bitmap marks missing consume no
/// packed bits and come back as `NaN`.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    bits_per_value: u8,
    reference_value: f32,
    binary_scale_factor: i16,
    decimal_scale_factor: i16,
    bitmap: Option<&[u8]>,
) -> Result<Vec<f32>, Grib2Error> {
    let reference = reference_value as f64;
    let binary_scale = 2f64.powi(binary_scale_factor as i32);
    let decimal_scale = 10f64.powi(-(decimal_scale_factor as i32));
    let nbits = bits_per_value as usize;

    if nbits > 32 {
        return Err(Grib2Error::UnpackingError(format!(
            "Invalid number of bits: {}",
            nbits
        )));
    }

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0usize;

    for i in 0..num_points {
        if let Some(bm) = bitmap {
            if !bit_is_set(bm, i) {
                values.push(f32::NAN);
                continue;
            }
        }

        let packed = if nbits == 0 {
            0
        } else {
            let raw = extract_bits(packed_data, bit_position, nbits)?;
            bit_position += nbits;
            raw
        };

        let value = (reference + packed as f64 * binary_scale) * decimal_scale;
        values.push(value as f32);
    }

    Ok(values)
}

/// Whether point `index` is present in a bitmap (1 = present, MSB first).
pub fn bit_is_set(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .map(|byte| (byte >> (7 - index % 8)) & 1 == 1)
        .unwrap_or(false)
}

/// Extract `num_bits` bits MSB-first starting at `start_bit`.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, Grib2Error> {
    if (start_bit + num_bits + 7) / 8 > data.len() {
        return Err(Grib2Error::UnpackingError(format!(
            "Not enough data to extract {} bits at bit {} ({} bytes)",
            num_bits,
            start_bit,
            data.len()
        )));
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let bit = (data[absolute_bit / 8] >> (7 - absolute_bit % 8)) & 1;
        result = (result << 1) | bit as u32;
    }
    Ok(result)
}
