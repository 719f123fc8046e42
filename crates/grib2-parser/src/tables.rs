//! GRIB2 parameter and level lookup tables.
//!
//! Translates numeric codes into the band metadata vocabulary used throughout
//! the pipeline: element names (`TMP`), level tags (`HTGL`), short names
//! (`2-HTGL`) and level descriptions (`2[m] HTGL="Specified height level above ground"`).
//!
//! [`Grib2Tables::ncep`] carries the codes NCEP models publish for the
//! variables we render. Entries can be added at runtime for anything else.

use std::collections::HashMap;

/// Lookup key for parameter: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// A GRIB2 parameter (code table 4.2 entry).
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    /// Short element name, e.g. `TMP`.
    pub element: String,
    /// Human readable name, e.g. `Temperature`.
    pub name: String,
    /// Native unit without brackets, e.g. `K`.
    pub unit: String,
}

impl ParameterInfo {
    pub fn new(element: &str, name: &str, unit: &str) -> Self {
        Self {
            element: element.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
        }
    }

    /// Unit in bracketed form, e.g. `[K]`.
    pub fn bracketed_unit(&self) -> String {
        format!("[{}]", self.unit)
    }

    /// Comment string, e.g. `Temperature [K]`.
    pub fn comment(&self) -> String {
        format!("{} [{}]", self.name, self.unit)
    }
}

/// A fixed surface type (code table 4.5 entry).
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    /// Short tag, e.g. `HTGL`.
    pub tag: String,
    /// Description, e.g. `Specified height level above ground`.
    pub description: String,
    /// Unit of the level value, `-` when dimensionless.
    pub unit: String,
}

impl LevelInfo {
    pub fn new(tag: &str, description: &str, unit: &str) -> Self {
        Self {
            tag: tag.to_string(),
            description: description.to_string(),
            unit: unit.to_string(),
        }
    }
}

/// GRIB2 parameter and level lookup tables.
#[derive(Debug, Clone, Default)]
pub struct Grib2Tables {
    parameters: HashMap<ParamKey, ParameterInfo>,
    levels: HashMap<u8, LevelInfo>,
}

impl Grib2Tables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables preloaded with the NCEP codes used by HRRR, GFS, GFS-Wave and NAM.
    pub fn ncep() -> Self {
        let mut t = Self::new();

        let params: [(ParamKey, &str, &str, &str); 26] = [
            ((0, 0, 0), "TMP", "Temperature", "K"),
            ((0, 0, 6), "DPT", "Dew point temperature", "K"),
            ((0, 1, 1), "RH", "Relative humidity", "%"),
            ((0, 1, 3), "PWAT", "Precipitable water", "kg/(m^2)"),
            ((0, 1, 7), "PRATE", "Precipitation rate", "kg/(m^2 s)"),
            ((0, 1, 8), "APCP", "Total precipitation", "kg/(m^2)"),
            ((0, 1, 11), "SNOD", "Snow depth", "m"),
            ((0, 1, 13), "WEASD", "Water equivalent of accumulated snow depth", "kg/(m^2)"),
            ((0, 2, 1), "WIND", "Wind speed", "m/s"),
            ((0, 2, 2), "UGRD", "u-component of wind", "m/s"),
            ((0, 2, 3), "VGRD", "v-component of wind", "m/s"),
            ((0, 2, 22), "GUST", "Wind speed (gust)", "m/s"),
            ((0, 3, 0), "PRES", "Pressure", "Pa"),
            ((0, 3, 1), "PRMSL", "Pressure reduced to MSL", "Pa"),
            ((0, 3, 5), "HGT", "Geopotential height", "gpm"),
            ((0, 3, 198), "MSLMA", "Mean sea level pressure (MAPS system reduction)", "Pa"),
            ((0, 6, 1), "TCDC", "Total cloud cover", "%"),
            ((0, 7, 6), "CAPE", "Convective available potential energy", "J/kg"),
            ((0, 7, 7), "CIN", "Convective inhibition", "J/kg"),
            ((0, 16, 195), "REFD", "Reflectivity", "dB"),
            ((0, 16, 196), "REFC", "Composite reflectivity", "dB"),
            ((0, 19, 0), "VIS", "Visibility", "m"),
            ((10, 0, 3), "HTSGW", "Significant height of combined wind waves and swell", "m"),
            ((10, 0, 4), "WVDIR", "Direction of wind waves", "deg"),
            ((10, 0, 11), "PERPW", "Primary wave mean period", "s"),
            ((10, 0, 10), "DIRPW", "Primary wave direction", "deg"),
        ];
        for ((d, c, n), element, name, unit) in params {
            t.add_parameter(d, c, n, ParameterInfo::new(element, name, unit));
        }

        let levels: [(u8, &str, &str, &str); 13] = [
            (1, "SFC", "Ground or water surface", "-"),
            (2, "CBL", "Cloud base level", "-"),
            (3, "CTL", "Level of cloud tops", "-"),
            (4, "0DEG", "Level of 0 degree C isotherm", "-"),
            (7, "TRO", "Tropopause", "-"),
            (8, "NTAT", "Nominal top of the atmosphere", "-"),
            (10, "EATM", "Entire Atmosphere (considered as a single layer)", "-"),
            (100, "ISBL", "Isobaric surface", "Pa"),
            (101, "MSL", "Mean sea level", "-"),
            (103, "HTGL", "Specified height level above ground", "m"),
            (105, "HYBL", "Hybrid level", "-"),
            (106, "DBLL", "Depth below land surface", "m"),
            (200, "EATM", "Entire Atmosphere (considered as a single layer)", "-"),
        ];
        for (code, tag, description, unit) in levels {
            t.add_level(code, LevelInfo::new(tag, description, unit));
        }

        t
    }

    /// Add a parameter mapping
    pub fn add_parameter(&mut self, discipline: u8, category: u8, number: u8, info: ParameterInfo) {
        self.parameters.insert((discipline, category, number), info);
    }

    /// Add a level type mapping
    pub fn add_level(&mut self, level_type: u8, info: LevelInfo) {
        self.levels.insert(level_type, info);
    }

    /// Look up a parameter by GRIB2 codes.
    ///
    /// Unknown codes come back as `VAR{discipline}-{category}-{number}` with an
    /// unknown unit.
    pub fn parameter(&self, discipline: u8, category: u8, number: u8) -> ParameterInfo {
        self.parameters
            .get(&(discipline, category, number))
            .cloned()
            .unwrap_or_else(|| {
                let code = format!("VAR{}-{}-{}", discipline, category, number);
                ParameterInfo::new(&code, &code, "-")
            })
    }

    /// Look up a level type. Unknown codes come back as `RESERVED{code}`.
    pub fn level(&self, level_type: u8) -> LevelInfo {
        self.levels.get(&level_type).cloned().unwrap_or_else(|| {
            LevelInfo::new(&format!("RESERVED{}", level_type), "Reserved", "-")
        })
    }

    /// Short name of a level, e.g. `2-HTGL` or `0-SFC`.
    pub fn short_name(&self, level_type: u8, level_value: f64) -> String {
        format!("{}-{}", format_level_value(level_value), self.level(level_type).tag)
    }

    /// Full level description, e.g. `2[m] HTGL="Specified height level above ground"`.
    pub fn level_description(&self, level_type: u8, level_value: f64) -> String {
        let level = self.level(level_type);
        format!(
            "{}[{}] {}=\"{}\"",
            format_level_value(level_value),
            level.unit,
            level.tag,
            level.description
        )
    }

    /// Get the number of parameters in the table
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Get the number of level types in the table
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Check if the tables are empty
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.levels.is_empty()
    }
}

/// Integral values print without decimals (`2`, not `2.0`).
pub fn format_level_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
