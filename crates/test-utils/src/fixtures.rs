//! Common test fixtures: variable catalogs and multi-band GRIB2 files.

use std::path::{Path, PathBuf};

use crate::grib2::{concat_messages, Grib2Builder};

/// An HRRR catalog covering every level shape the band resolver knows.
///
/// The `temperature` ramp has a stop exactly at 0.0 with color `#FFFFFF`.
pub const HRRR_CATALOG: &str = r##"
model: hrrr
product: wrfsfcf
metadata:
  source: NOAA HRRR
  update_frequency: hourly

processing:
  resampling_method: bilinear
  target_resolution_meters: 0
  compression: DEFLATE
  tile_size: 256
  overview_levels: [2, 4]

variables:
  temperature_2m:
    grib_search: "TMP:2 m"
    display_name: "Temperature (2m)"
    units_source: K
    units_display: C
    conversion: kelvin_to_celsius
    color_ramp: temperature
    enabled: true
    priority: 1
    description: Air temperature two meters above ground

  composite_reflectivity:
    grib_search: "REFC:entire atmosphere"
    display_name: "Composite Reflectivity"
    units_source: dBZ
    units_display: dBZ
    color_ramp: reflectivity
    enabled: true
    priority: 1

  wind_gust:
    grib_search: "GUST:surface"
    display_name: "Wind Gust"
    units_source: m/s
    units_display: mph
    conversion: ms_to_mph
    color_ramp: wind
    enabled: true
    priority: 2

  dewpoint_2m:
    grib_search: "DPT:2 m"
    display_name: "Dew Point (2m)"
    units_source: K
    units_display: F
    conversion: kelvin_to_fahrenheit
    color_ramp: temperature
    enabled: false
    priority: 3

color_ramps:
  temperature:
    colors:
      - { value: -40.0, color: "#5E3C99" }
      - { value: -10.0, color: "#0000FF" }
      - { value: 0.0, color: "#FFFFFF" }
      - { value: 20.0, color: "#FFFF00" }
      - { value: 40.0, color: "#FF0000" }
  reflectivity:
    colors:
      - { value: 5.0, color: "#04E9E7" }
      - { value: 30.0, color: "#01C501" }
      - { value: 50.0, color: "#FD9500" }
      - { value: 70.0, color: "#FD00FD" }
  wind:
    colors:
      - { value: 0.0, color: "#FFFFFF" }
      - { value: 50.0, color: "#0000FF" }

conversions:
  kelvin_to_celsius:
    formula: "value - 273.15"
    description: Kelvin to Celsius
  kelvin_to_fahrenheit:
    formula: "(value - 273.15) * 9 / 5 + 32"
  ms_to_mph:
    formula: "value * 2.23694"
"##;

/// A catalog whose only variable points at a ramp that does not exist.
pub const CATALOG_WITH_UNDEFINED_RAMP: &str = r##"
model: hrrr
product: wrfsfcf
variables:
  temperature_2m:
    grib_search: "TMP:2 m"
    display_name: "Temperature (2m)"
    units_source: K
    units_display: C
    color_ramp: no_such_ramp
    enabled: true
    priority: 1
color_ramps: {}
conversions: {}
"##;

/// Write a catalog into `dir` as `variables.yaml`.
pub fn write_catalog(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("variables.yaml");
    std::fs::write(&path, yaml).expect("write catalog fixture");
    path
}

/// HRRR-like multi-band file.
///
/// Band order:
/// 1. `TMP` at `0-EATM` (checks that "2 m" never matches entire atmosphere)
/// 2. `REFC` at `0-EATM`
/// 3. `TMP` at `0-SFC`
/// 4. `TMP` at `2-HTGL`, constant `temperature_k`
/// 5. `GUST` at `0-SFC`
/// 6. `UGRD` at `10-HTGL`
pub fn hrrr_bands(temperature_k: f32) -> Vec<u8> {
    let base = Grib2Builder::new_hrrr();
    concat_messages(&[
        base.clone().with_parameter(0, 0).with_level(10, 0).with_constant_value(230.0).build(),
        base.clone()
            .with_parameter(16, 196)
            .with_level(10, 0)
            .with_constant_value(35.0)
            .build(),
        base.clone().with_parameter(0, 0).with_level(1, 0).with_constant_value(280.0).build(),
        base.clone()
            .with_parameter(0, 0)
            .with_level(103, 2)
            .with_constant_value(temperature_k)
            .build(),
        base.clone().with_parameter(2, 22).with_level(1, 0).with_constant_value(10.0).build(),
        base.with_parameter(2, 2).with_level(103, 10).with_constant_value(5.0).build(),
    ])
}

/// Write [`hrrr_bands`] to `dir` under a name following the HRRR convention.
pub fn write_hrrr_file(dir: &Path, temperature_k: f32) -> PathBuf {
    let path = dir.join("hrrr.20260110.t19z.f06.grib2");
    std::fs::write(&path, hrrr_bands(temperature_k)).expect("write grib2 fixture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hrrr_bands_are_six_messages() {
        let data = hrrr_bands(273.15);
        let count = data.windows(4).filter(|w| *w == b"GRIB").count();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_write_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path(), HRRR_CATALOG);
        assert!(std::fs::read_to_string(path).unwrap().contains("kelvin_to_celsius"));
    }
}
