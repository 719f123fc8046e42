//! Synthetic GRIB2 message builder.
//!
//! Produces small but structurally valid GRIB2 edition 2 messages with simple
//! packing (template 5.0). `NaN` samples are written as bitmap-missing points.

/// Grid geometry written into section 3.
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderGrid {
    /// Template 3.0, angles in micro-degrees.
    LatLon {
        la1: i32,
        lo1: i32,
        la2: i32,
        lo2: i32,
        di: u32,
        dj: u32,
    },
    /// Template 3.30, angles in micro-degrees, spacing in millimetres.
    Lambert {
        la1: i32,
        lo1: i32,
        lad: i32,
        lov: i32,
        dx: u32,
        dy: u32,
        latin1: i32,
        latin2: i32,
    },
    /// Template 3.20, north pole.
    PolarStereographic {
        la1: i32,
        lo1: i32,
        lad: i32,
        lov: i32,
        dx: u32,
        dy: u32,
    },
}

/// Build a GRIB2 message with the specified parameters
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    ni: u32,
    nj: u32,
    grid: BuilderGrid,
    scanning_mode: u8,
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    data_values: Vec<f32>,
}

impl Grib2Builder {
    /// A 10x10 one-degree lat/lon grid over the western US (GFS layout,
    /// 0-360 longitudes, north-to-south rows) holding 2 m temperature.
    pub fn new_gfs() -> Self {
        let (ni, nj) = (10, 10);
        Self {
            discipline: 0,
            center: 7,
            year: 2026,
            month: 1,
            day: 10,
            hour: 12,
            ni,
            nj,
            grid: BuilderGrid::LatLon {
                la1: 45_000_000,
                lo1: 230_000_000,
                la2: 36_000_000,
                lo2: 239_000_000,
                di: 1_000_000,
                dj: 1_000_000,
            },
            scanning_mode: 0b0000_0000,
            param_category: 0,
            param_number: 0,
            level_type: 103,
            level_value: 2,
            forecast_hour: 0,
            data_values: vec![288.15; (ni * nj) as usize],
        }
    }

    /// A small HRRR-style Lambert conformal grid (3 km spacing, rows south to north).
    pub fn new_hrrr() -> Self {
        let (ni, nj) = (12, 8);
        Self {
            discipline: 0,
            center: 7,
            year: 2026,
            month: 1,
            day: 10,
            hour: 19,
            ni,
            nj,
            grid: BuilderGrid::Lambert {
                la1: 38_000_000,
                lo1: 262_000_000,
                lad: 38_500_000,
                lov: 262_500_000,
                dx: 3_000_000,
                dy: 3_000_000,
                latin1: 38_500_000,
                latin2: 38_500_000,
            },
            scanning_mode: 0b0100_0000,
            param_category: 0,
            param_number: 0,
            level_type: 103,
            level_value: 2,
            forecast_hour: 0,
            data_values: vec![288.15; (ni * nj) as usize],
        }
    }

    pub fn with_discipline(mut self, discipline: u8) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Resize the grid, keeping the geometry origin and spacing.
    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        if let BuilderGrid::LatLon { la1, lo1, la2, lo2, di, dj } = &mut self.grid {
            *la2 = *la1 - (*dj as i32) * (nj as i32 - 1);
            *lo2 = *lo1 + (*di as i32) * (ni as i32 - 1);
        }
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    pub fn with_geometry(mut self, grid: BuilderGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_scanning_mode(mut self, mode: u8) -> Self {
        self.scanning_mode = mode;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    pub fn with_gradient(mut self, min_val: f32, max_val: f32) -> Self {
        let n = (self.ni * self.nj) as usize;
        self.data_values = (0..n)
            .map(|i| min_val + (max_val - min_val) * (i as f32 / n as f32))
            .collect();
        self
    }

    /// Values in scan order. `NaN` marks a missing point.
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Build the complete GRIB2 message bytes
    pub fn build(&self) -> Vec<u8> {
        build_message(self, std::slice::from_ref(self))
    }

    /// Build one message whose sections 1 and 3 come from `self`, followed by
    /// sections 4 to 7 repeated for every entry of `fields`.
    pub fn build_with_submessages(&self, fields: &[Grib2Builder]) -> Vec<u8> {
        build_message(self, fields)
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);

        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Start of forecast

        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0);
        section.push(0);

        section.push(0); // Operational
        section.push(1); // Forecast
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let (template, body): (u16, Vec<u8>) = match &self.grid {
            BuilderGrid::LatLon { la1, lo1, la2, lo2, di, dj } => {
                let mut gd = earth_shape();
                gd.extend_from_slice(&self.ni.to_be_bytes());
                gd.extend_from_slice(&self.nj.to_be_bytes());
                gd.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
                gd.extend_from_slice(&u32::MAX.to_be_bytes()); // Subdivisions
                gd.extend_from_slice(&sm32(*la1));
                gd.extend_from_slice(&sm32(*lo1));
                gd.push(48);
                gd.extend_from_slice(&sm32(*la2));
                gd.extend_from_slice(&sm32(*lo2));
                gd.extend_from_slice(&di.to_be_bytes());
                gd.extend_from_slice(&dj.to_be_bytes());
                gd.push(self.scanning_mode);
                (0, gd)
            }
            BuilderGrid::Lambert { la1, lo1, lad, lov, dx, dy, latin1, latin2 } => {
                let mut gd = earth_shape();
                gd.extend_from_slice(&self.ni.to_be_bytes());
                gd.extend_from_slice(&self.nj.to_be_bytes());
                gd.extend_from_slice(&sm32(*la1));
                gd.extend_from_slice(&sm32(*lo1));
                gd.push(8);
                gd.extend_from_slice(&sm32(*lad));
                gd.extend_from_slice(&sm32(*lov));
                gd.extend_from_slice(&dx.to_be_bytes());
                gd.extend_from_slice(&dy.to_be_bytes());
                gd.push(0); // North pole in projection plane
                gd.push(self.scanning_mode);
                gd.extend_from_slice(&sm32(*latin1));
                gd.extend_from_slice(&sm32(*latin2));
                gd.extend_from_slice(&sm32(-90_000_000)); // Southern pole lat
                gd.extend_from_slice(&0u32.to_be_bytes()); // Southern pole lon
                (30, gd)
            }
            BuilderGrid::PolarStereographic { la1, lo1, lad, lov, dx, dy } => {
                let mut gd = earth_shape();
                gd.extend_from_slice(&self.ni.to_be_bytes());
                gd.extend_from_slice(&self.nj.to_be_bytes());
                gd.extend_from_slice(&sm32(*la1));
                gd.extend_from_slice(&sm32(*lo1));
                gd.push(8);
                gd.extend_from_slice(&sm32(*lad));
                gd.extend_from_slice(&sm32(*lov));
                gd.extend_from_slice(&dx.to_be_bytes());
                gd.extend_from_slice(&dy.to_be_bytes());
                gd.push(0);
                gd.push(self.scanning_mode);
                (20, gd)
            }
        };

        let mut section = Vec::new();
        section.extend_from_slice(&(14 + body.len() as u32).to_be_bytes());
        section.push(3);
        section.push(0); // Source of grid definition
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0);
        section.push(0);
        section.extend_from_slice(&template.to_be_bytes());
        section.extend_from_slice(&body);
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&34u32.to_be_bytes());
        section.push(4);

        section.extend_from_slice(&0u16.to_be_bytes()); // Coordinate values
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 4.0

        section.push(self.param_category);
        section.push(self.param_number);
        section.push(2); // Forecast
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes());
        section.push(0);
        section.push(1); // Hours
        section.extend_from_slice(&self.forecast_hour.to_be_bytes());

        section.push(self.level_type);
        section.push(0);
        section.extend_from_slice(&self.level_value.to_be_bytes());

        section.push(255); // No second surface
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section
    }

    fn present_values(&self) -> Vec<f32> {
        self.data_values.iter().copied().filter(|v| !v.is_nan()).collect()
    }

    /// (reference, binary scale, bits per value) for simple packing.
    fn packing(&self) -> (f32, i16, u8) {
        let present = self.present_values();
        let (min_val, max_val) = present.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(min, max), &v| (min.min(v), max.max(v)),
        );
        if present.is_empty() {
            return (0.0, 0, 0);
        }
        let range = max_val - min_val;
        if range == 0.0 {
            return (min_val, 0, 0);
        }
        // 16-bit packing: range = 65535 * 2^E
        let e = (range as f64 / 65535.0).log2().ceil() as i16;
        (min_val, e, 16)
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference, e, nbits) = self.packing();

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        section.extend_from_slice(&(self.present_values().len() as u32).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0
        section.extend_from_slice(&reference.to_be_bytes());
        section.extend_from_slice(&sm16(e));
        section.extend_from_slice(&sm16(0)); // Decimal scale factor
        section.push(nbits);
        section.push(0); // Floating point
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        if !self.data_values.iter().any(|v| v.is_nan()) {
            section.extend_from_slice(&6u32.to_be_bytes());
            section.push(6);
            section.push(255);
            return section;
        }

        let mut bits = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, v) in self.data_values.iter().enumerate() {
            if !v.is_nan() {
                bits[i / 8] |= 0x80 >> (i % 8);
            }
        }
        section.extend_from_slice(&(6 + bits.len() as u32).to_be_bytes());
        section.push(6);
        section.push(0);
        section.extend_from_slice(&bits);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let (reference, e, nbits) = self.packing();
        let mut packed = Vec::new();
        if nbits == 16 {
            let scale = 2f64.powi(e as i32);
            for v in self.present_values() {
                let p = ((v as f64 - reference as f64) / scale).round().clamp(0.0, 65535.0) as u16;
                packed.extend_from_slice(&p.to_be_bytes());
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }
}

fn build_message(head: &Grib2Builder, fields: &[Grib2Builder]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&head.build_section1());
    body.extend_from_slice(&head.build_section3());
    for field in fields {
        body.extend_from_slice(&field.build_section4());
        body.extend_from_slice(&field.build_section5());
        body.extend_from_slice(&field.build_section6());
        body.extend_from_slice(&field.build_section7());
    }

    let message_length = 16 + body.len() + 4;
    let mut message = Vec::with_capacity(message_length);
    message.extend_from_slice(b"GRIB");
    message.extend_from_slice(&[0, 0]);
    message.push(head.discipline);
    message.push(2);
    message.extend_from_slice(&(message_length as u64).to_be_bytes());
    message.extend_from_slice(&body);
    message.extend_from_slice(b"7777");
    message
}

/// Concatenate messages into one multi-band file body.
pub fn concat_messages(messages: &[Vec<u8>]) -> Vec<u8> {
    messages.concat()
}

/// Octets 15-30 of the lat/lon, polar and Lambert templates: NCEP sphere.
fn earth_shape() -> Vec<u8> {
    let mut gd = vec![6, 0];
    gd.extend_from_slice(&0u32.to_be_bytes());
    gd.push(0);
    gd.extend_from_slice(&0u32.to_be_bytes());
    gd.push(0);
    gd.extend_from_slice(&0u32.to_be_bytes());
    gd
}

/// Sign-and-magnitude 32-bit encoding.
fn sm32(v: i32) -> [u8; 4] {
    let magnitude = v.unsigned_abs() & 0x7FFF_FFFF;
    let raw = if v < 0 { magnitude | 0x8000_0000 } else { magnitude };
    raw.to_be_bytes()
}

/// Sign-and-magnitude 16-bit encoding.
fn sm16(v: i16) -> [u8; 2] {
    let magnitude = v.unsigned_abs() & 0x7FFF;
    let raw = if v < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_gfs_message() {
        let data = Grib2Builder::new_gfs().build();

        assert_eq!(&data[0..4], b"GRIB");
        assert_eq!(data[7], 2);
        assert_eq!(data[6], 0);
        assert_eq!(&data[data.len() - 4..], b"7777");

        let length = u64::from_be_bytes(data[8..16].try_into().unwrap());
        assert_eq!(length as usize, data.len());
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(sm16(-3), [0x80, 0x03]);
        assert_eq!(sm32(-10), [0x80, 0, 0, 10]);
        assert_eq!(sm32(10), [0, 0, 0, 10]);
    }

    #[test]
    fn test_bitmap_written_for_nan() {
        let builder = Grib2Builder::new_gfs()
            .with_grid(3, 1)
            .with_data(vec![1.0, f32::NAN, 3.0]);
        let section6 = builder.build_section6();
        assert_eq!(section6[5], 0);
        assert_eq!(section6[6], 0b1010_0000);
    }

    #[test]
    fn test_submessages_share_header() {
        let head = Grib2Builder::new_gfs().with_grid(2, 2);
        let single = head.build();
        let double = head.build_with_submessages(&[head.clone(), head.clone()]);
        assert!(double.len() > single.len());
        assert_eq!(&double[double.len() - 4..], b"7777");
    }
}
