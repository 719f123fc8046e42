//! Raster file names and the tile tree paths derived from them.
//!
//! Rasters are named `{variable}_{model}.{YYYYMMDD}.t{HH}z.f{FF}`, with an
//! optional `_colored` suffix, e.g.
//! `temperature_2m_hrrr.20260110.t19z.f06_colored.zarr`.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::error::TilingError;

static RASTER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)_(hrrr|gfs_wave|gfs|nam)\.(\d{8})\.t(\d{2}z)\.f(\d{2,3})$")
        .expect("valid raster name regex")
});

/// Prefixes that start the model part of a name the full pattern rejects.
const MODEL_PREFIXES: [&str; 3] = ["hrrr", "gfs", "nam"];

/// Suffix added to colorized rasters.
pub const COLORED_SUFFIX: &str = "_colored";

/// Extensions stripped before a name is parsed, longest first.
const KNOWN_EXTENSIONS: [&str; 6] = [".grib2.gz", ".grb2.gz", ".grib2", ".grb2", ".zarr", ".tif"];

const UNKNOWN: &str = "unknown";

/// Parts of a raster name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileNameInfo {
    pub variable: String,
    pub model: String,
    /// `YYYYMMDD`
    pub date: String,
    /// `HHz`
    pub cycle: String,
    /// Forecast hour digits, e.g. `06` or `120`.
    pub forecast: String,
}

impl FileNameInfo {
    /// Parse a stem. Falls back to the variable alone (everything else
    /// `unknown`) when only the model prefix can be found.
    pub fn parse(stem: &str) -> Result<Self, TilingError> {
        let name = stem.strip_suffix(COLORED_SUFFIX).unwrap_or(stem);

        if let Some(caps) = RASTER_NAME.captures(name) {
            return Ok(Self {
                variable: caps[1].to_string(),
                model: caps[2].to_string(),
                date: caps[3].to_string(),
                cycle: caps[4].to_string(),
                forecast: caps[5].to_string(),
            });
        }

        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() >= 2 {
            if let Some(model_idx) = parts
                .iter()
                .position(|p| MODEL_PREFIXES.iter().any(|m| p.starts_with(m)))
            {
                let variable = parts[..model_idx].join("_");
                if !variable.is_empty() {
                    return Ok(Self {
                        variable,
                        model: UNKNOWN.to_string(),
                        date: UNKNOWN.to_string(),
                        cycle: UNKNOWN.to_string(),
                        forecast: UNKNOWN.to_string(),
                    });
                }
            }
        }

        Err(TilingError::UnparseableName(stem.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, TilingError> {
        Self::parse(&stem_of(path))
    }

    /// `{date}T{cycle}`, the run directory of the tile tree.
    pub fn run_dir(&self) -> String {
        format!("{}T{}", self.date, self.cycle)
    }

    /// `{variable}/{date}T{cycle}/{forecast}` under `tiles_root`.
    pub fn tile_dir(&self, tiles_root: &Path) -> PathBuf {
        tiles_root
            .join(&self.variable)
            .join(self.run_dir())
            .join(&self.forecast)
    }

    /// Model run date, when the name carried one.
    pub fn run_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y%m%d").ok()
    }

    /// Whether the full pattern matched (not the fallback).
    pub fn is_complete(&self) -> bool {
        self.model != UNKNOWN
    }
}

/// File name without directory and known raster/grid extensions.
pub fn stem_of(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let lower = name.to_lowercase();
    for ext in KNOWN_EXTENSIONS {
        if lower.ends_with(ext) {
            return name[..name.len() - ext.len()].to_string();
        }
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or(name)
}

/// Name of the raster written for `variable` from a source grid file.
pub fn processed_name(variable: &str, source: &Path) -> String {
    format!("{}_{}", variable, stem_of(source))
}

/// Name of the colorized raster for a processed raster.
pub fn colored_name(raster: &Path) -> String {
    format!("{}{}", stem_of(raster), COLORED_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pattern() {
        let info = FileNameInfo::parse("temperature_2m_hrrr.20260110.t19z.f06_colored").unwrap();
        assert_eq!(info.variable, "temperature_2m");
        assert_eq!(info.model, "hrrr");
        assert_eq!(info.date, "20260110");
        assert_eq!(info.cycle, "19z");
        assert_eq!(info.forecast, "06");
        assert_eq!(info.run_dir(), "20260110T19z");
        assert_eq!(info.run_date(), NaiveDate::from_ymd_opt(2026, 1, 10));
        assert!(info.is_complete());
    }

    #[test]
    fn test_gfs_wave_and_three_digit_hour() {
        let info = FileNameInfo::parse("wave_height_gfs_wave.20260203.t00z.f120").unwrap();
        assert_eq!(info.variable, "wave_height");
        assert_eq!(info.model, "gfs_wave");
        assert_eq!(info.forecast, "120");
        assert_eq!(
            info.tile_dir(Path::new("/tiles")),
            PathBuf::from("/tiles/wave_height/20260203T00z/120")
        );
    }

    #[test]
    fn test_fallback_keeps_variable() {
        let info = FileNameInfo::parse("wind_gust_hrrrx_custom").unwrap();
        assert_eq!(info.variable, "wind_gust");
        assert_eq!(info.model, "unknown");
        assert_eq!(info.forecast, "unknown");
        assert!(!info.is_complete());
        assert_eq!(info.run_date(), None);
    }

    #[test]
    fn test_unparseable() {
        assert!(FileNameInfo::parse("random").is_err());
        assert!(FileNameInfo::parse("hrrr_only").is_err());
        assert!(FileNameInfo::parse("no_model_here").is_err());
    }

    #[test]
    fn test_names() {
        let src = Path::new("/data/hrrr.20260110.t19z.f06.grib2");
        assert_eq!(stem_of(src), "hrrr.20260110.t19z.f06");
        assert_eq!(stem_of(Path::new("x/hrrr.20260110.t19z.f06.grib2.gz")), "hrrr.20260110.t19z.f06");
        assert_eq!(processed_name("temperature_2m", src), "temperature_2m_hrrr.20260110.t19z.f06");

        let raster = Path::new("/out/temperature_2m_hrrr.20260110.t19z.f06.zarr");
        assert_eq!(colored_name(raster), "temperature_2m_hrrr.20260110.t19z.f06_colored");

        let info = FileNameInfo::from_path(Path::new(
            "/out/temperature_2m_hrrr.20260110.t19z.f06_colored.zarr",
        ))
        .unwrap();
        assert_eq!(info.forecast, "06");
    }
}
