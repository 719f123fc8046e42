//! GRIB2 section parsing.
//!
//! Each parser takes the bytes of one section, starting at its 4-byte length
//! field, so octet `n` of the WMO tables lives at index `n - 1`.
//! Signed GRIB2 integers use sign-and-magnitude encoding (high bit = sign).

use crate::{Grib2Error, Result};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub local_table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Template 3.0: regular latitude/longitude grid. Angles in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct LatLonGrid {
    pub ni: u32,
    pub nj: u32,
    pub la1: f64,
    pub lo1: f64,
    pub la2: f64,
    pub lo2: f64,
    pub di: f64,
    pub dj: f64,
}

/// Template 3.30: Lambert conformal. Angles in degrees, spacing in meters.
#[derive(Debug, Clone, PartialEq)]
pub struct LambertGrid {
    pub nx: u32,
    pub ny: u32,
    pub la1: f64,
    pub lo1: f64,
    pub lad: f64,
    pub lov: f64,
    pub dx: f64,
    pub dy: f64,
    pub latin1: f64,
    pub latin2: f64,
}

/// Template 3.20: polar stereographic. Angles in degrees, spacing in meters.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarStereoGrid {
    pub nx: u32,
    pub ny: u32,
    pub la1: f64,
    pub lo1: f64,
    pub lad: f64,
    pub lov: f64,
    pub dx: f64,
    pub dy: f64,
    pub south_pole: bool,
}

/// Grid geometry by template.
#[derive(Debug, Clone, PartialEq)]
pub enum GridTemplate {
    LatLon(LatLonGrid),
    Lambert(LambertGrid),
    PolarStereographic(PolarStereoGrid),
    /// Template this crate does not interpret; dimensions only when known.
    Other { template: u16, ni: u32, nj: u32 },
}

/// Section 3: Grid Definition Section
#[derive(Debug, Clone)]
pub struct GridDefinition {
    pub num_data_points: u32,
    pub template_number: u16,
    pub shape_of_earth: u8,
    pub earth_radius: f64,
    pub scanning_mode: u8,
    pub grid: GridTemplate,
}

impl GridDefinition {
    /// (columns, rows) of the grid.
    pub fn dims(&self) -> (usize, usize) {
        match &self.grid {
            GridTemplate::LatLon(g) => (g.ni as usize, g.nj as usize),
            GridTemplate::Lambert(g) => (g.nx as usize, g.ny as usize),
            GridTemplate::PolarStereographic(g) => (g.nx as usize, g.ny as usize),
            GridTemplate::Other { ni, nj, .. } => (*ni as usize, *nj as usize),
        }
    }
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template_number: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub time_unit: u8,
    pub forecast_time: u32,
    pub level_type: u8,
    pub level_value: f64,
}

impl ProductDefinition {
    /// Forecast offset from the reference time in seconds, when the unit is known.
    pub fn forecast_seconds(&self) -> Option<i64> {
        let unit: i64 = match self.time_unit {
            0 => 60,
            1 => 3_600,
            2 => 86_400,
            10 => 3 * 3_600,
            11 => 6 * 3_600,
            12 => 12 * 3_600,
            13 => 1,
            _ => return None,
        };
        Some(self.forecast_time as i64 * unit)
    }
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template_number: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
    pub original_data_type: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

// ===== Byte helpers =====

pub(crate) fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

pub(crate) fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Sign-and-magnitude 32-bit integer.
pub(crate) fn read_i32_sm(b: &[u8], at: usize) -> i32 {
    let raw = read_u32(b, at);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Sign-and-magnitude 16-bit integer.
pub(crate) fn read_i16_sm(b: &[u8], at: usize) -> i16 {
    let raw = read_u16(b, at);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn require_len(section: &[u8], number: u8, needed: usize) -> Result<()> {
    if section.len() < needed {
        return Err(Grib2Error::InvalidSection {
            section: number,
            reason: format!("need {} bytes, got {}", needed, section.len()),
        });
    }
    Ok(())
}

/// Micro-degree angle to degrees.
fn micro(v: i32) -> f64 {
    v as f64 * 1e-6
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from the start of a message.
pub fn parse_indicator(data: &[u8]) -> Result<Indicator> {
    if data.len() < 16 {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat("Invalid GRIB magic bytes".to_string()));
    }

    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let message_length = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);

    Ok(Indicator {
        discipline,
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification).
pub fn parse_identification(section: &[u8]) -> Result<Identification> {
    require_len(section, 1, 21)?;

    let year = read_u16(section, 12);
    let (month, day, hour, minute, second) =
        (section[14], section[15], section[16], section[17], section[18]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center: read_u16(section, 5),
        sub_center: read_u16(section, 7),
        table_version: section[9],
        local_table_version: section[10],
        significance_of_reference_time: section[11],
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        production_status: section[19],
        data_type: section[20],
    })
}

/// Earth radius for code table 3.2, falling back to the NCEP sphere.
fn earth_radius(shape: u8, scale: u8, scaled_value: u32) -> f64 {
    match shape {
        0 => 6_367_470.0,
        1 if scaled_value != 0 && scaled_value != u32::MAX => {
            scaled_value as f64 / 10f64.powi(scale as i32)
        }
        2 | 4 | 5 => 6_378_137.0,
        8 => 6_371_200.0,
        _ => 6_371_229.0,
    }
}

/// Parse Section 3 (Grid Definition).
pub fn parse_grid_definition(section: &[u8]) -> Result<GridDefinition> {
    require_len(section, 3, 14)?;

    let num_data_points = read_u32(section, 6);
    let template_number = read_u16(section, 12);
    let gd = &section[14..];

    // Octets 15-30 (shape of the earth) are common to the templates we read.
    let (shape_of_earth, radius) = if gd.len() >= 6 {
        (gd[0], earth_radius(gd[0], gd[1], read_u32(gd, 2)))
    } else {
        (6, 6_371_229.0)
    };

    let (grid, scanning_mode) = match template_number {
        0 => {
            require_len(section, 3, 72)?;
            // Basic angle 0 (or missing) means micro-degree units.
            let basic = read_u32(gd, 24);
            let subdiv = read_u32(gd, 28);
            let unit = if basic == 0 || basic == u32::MAX || subdiv == u32::MAX || subdiv == 0 {
                1e-6
            } else {
                basic as f64 / subdiv as f64
            };
            let grid = LatLonGrid {
                ni: read_u32(gd, 16),
                nj: read_u32(gd, 20),
                la1: read_i32_sm(gd, 32) as f64 * unit,
                lo1: read_i32_sm(gd, 36) as f64 * unit,
                la2: read_i32_sm(gd, 41) as f64 * unit,
                lo2: read_i32_sm(gd, 45) as f64 * unit,
                di: read_u32(gd, 49) as f64 * unit,
                dj: read_u32(gd, 53) as f64 * unit,
            };
            (GridTemplate::LatLon(grid), gd[57])
        }
        20 => {
            require_len(section, 3, 65)?;
            let grid = PolarStereoGrid {
                nx: read_u32(gd, 16),
                ny: read_u32(gd, 20),
                la1: micro(read_i32_sm(gd, 24)),
                lo1: micro(read_i32_sm(gd, 28)),
                lad: micro(read_i32_sm(gd, 33)),
                lov: micro(read_i32_sm(gd, 37)),
                dx: read_u32(gd, 41) as f64 * 1e-3,
                dy: read_u32(gd, 45) as f64 * 1e-3,
                south_pole: gd[49] & 0x80 != 0,
            };
            (GridTemplate::PolarStereographic(grid), gd[50])
        }
        30 => {
            require_len(section, 3, 81)?;
            let grid = LambertGrid {
                nx: read_u32(gd, 16),
                ny: read_u32(gd, 20),
                la1: micro(read_i32_sm(gd, 24)),
                lo1: micro(read_i32_sm(gd, 28)),
                lad: micro(read_i32_sm(gd, 33)),
                lov: micro(read_i32_sm(gd, 37)),
                dx: read_u32(gd, 41) as f64 * 1e-3,
                dy: read_u32(gd, 45) as f64 * 1e-3,
                latin1: micro(read_i32_sm(gd, 51)),
                latin2: micro(read_i32_sm(gd, 55)),
            };
            (GridTemplate::Lambert(grid), gd[50])
        }
        other => {
            // Most templates start with Ni/Nj right after the earth shape.
            let (ni, nj) = if gd.len() >= 24 {
                (read_u32(gd, 16), read_u32(gd, 20))
            } else {
                (0, 0)
            };
            (GridTemplate::Other { template: other, ni, nj }, 0)
        }
    };

    Ok(GridDefinition {
        num_data_points,
        template_number,
        shape_of_earth,
        earth_radius: radius,
        scanning_mode,
        grid,
    })
}

/// Parse Section 4 (Product Definition).
///
/// Templates 4.0 through 4.15 share the leading 34 octets read here.
pub fn parse_product_definition(section: &[u8]) -> Result<ProductDefinition> {
    require_len(section, 4, 34)?;

    let scale = section[23];
    let scaled = read_u32(section, 24);
    let level_value = if scale == 255 || scaled == u32::MAX {
        0.0
    } else {
        let scale = if scale & 0x80 != 0 {
            -((scale & 0x7F) as i32)
        } else {
            scale as i32
        };
        let magnitude = (scaled & 0x7FFF_FFFF) as f64;
        let value = if scaled & 0x8000_0000 != 0 { -magnitude } else { magnitude };
        value / 10f64.powi(scale)
    };

    Ok(ProductDefinition {
        template_number: read_u16(section, 7),
        parameter_category: section[9],
        parameter_number: section[10],
        time_unit: section[17],
        forecast_time: read_u32(section, 18),
        level_type: section[22],
        level_value,
    })
}

/// Parse Section 5 (Data Representation).
pub fn parse_data_representation(section: &[u8]) -> Result<DataRepresentation> {
    require_len(section, 5, 11)?;

    let num_data_points = read_u32(section, 5);
    let template_number = read_u16(section, 9);

    // Templates 5.0, 5.2, 5.3, 5.40 and 5.41 all begin with R, E, D, nbits.
    let (reference_value, binary_scale_factor, decimal_scale_factor, bits_per_value, original_data_type) =
        if section.len() >= 21 {
            (
                f32::from_be_bytes([section[11], section[12], section[13], section[14]]),
                read_i16_sm(section, 15),
                read_i16_sm(section, 17),
                section[19],
                section[20],
            )
        } else {
            (0.0, 0, 0, 0, 0)
        };

    Ok(DataRepresentation {
        num_data_points,
        template_number,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value,
        original_data_type,
    })
}

/// Parse Section 6 (Bitmap). Indicator 255 means no bitmap.
pub fn parse_bitmap(section: &[u8]) -> Result<Bitmap> {
    require_len(section, 6, 6)?;
    Ok(Bitmap {
        indicator: section[5],
        data: Bytes::copy_from_slice(&section[6..]),
    })
}

/// Parse Section 7 (Data).
pub fn parse_data_section(section: &[u8]) -> Result<DataSection> {
    require_len(section, 7, 5)?;
    Ok(DataSection {
        data: Bytes::copy_from_slice(&section[5..]),
    })
}
