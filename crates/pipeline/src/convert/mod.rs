//! Unit conversion driven by the catalog's `conversions:` formulas.

mod expr;

pub use expr::CompiledFormula;

use rayon::prelude::*;
use std::fmt;
use tracing::{debug, info};

use grid_processor::{Grid, UNIT_KEY};

use crate::catalog::Catalog;
use crate::error::{ConversionError, EvalError};

/// Metadata key naming the last conversion applied to a grid.
pub const CONVERSION_KEY: &str = "UNIT_CONVERSION";

/// Why [`apply_if_needed`] left a grid alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The unit tag already says the data is in the target unit.
    AlreadyInUnit(String),
    /// This conversion was already applied to the grid.
    AlreadyApplied(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInUnit(unit) => write!(f, "data already in {}", unit),
            Self::AlreadyApplied(name) => write!(f, "{} already applied", name),
        }
    }
}

/// What [`apply_if_needed`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Converted {
        conversion: String,
        /// Number of valid samples rewritten.
        samples: usize,
        unit: String,
    },
    Skipped(SkipReason),
}

/// Compile the named conversion from the catalog.
pub fn compile(catalog: &Catalog, name: &str) -> Result<CompiledFormula, ConversionError> {
    let conversion = catalog
        .conversion(name)
        .ok_or_else(|| ConversionError::ConversionNotFound(name.to_string()))?;
    if conversion.formula.trim().is_empty() {
        return Err(ConversionError::ConversionFormulaMissing(name.to_string()));
    }
    CompiledFormula::parse(&conversion.formula)
}

/// Convert a single value.
pub fn apply(catalog: &Catalog, value: f64, name: &str) -> Result<f64, ConversionError> {
    compile(catalog, name)?
        .eval(value)
        .map_err(|source| ConversionError::ConversionEvaluationError {
            name: name.to_string(),
            source,
        })
}

/// Unit tag written to a grid after `conversion` ran.
pub fn target_unit_tag(conversion: &str) -> String {
    match conversion {
        "kelvin_to_celsius" => "[C]".to_string(),
        "kelvin_to_fahrenheit" => "[F]".to_string(),
        other => match other.rsplit_once("_to_") {
            Some((_, unit)) if !unit.is_empty() => format!("[{}]", unit),
            _ => format!("[{}]", other),
        },
    }
}

fn skip_reason(grid: &Grid, conversion: &str) -> Option<SkipReason> {
    if grid.metadata.get(CONVERSION_KEY).map(String::as_str) == Some(conversion) {
        return Some(SkipReason::AlreadyApplied(conversion.to_string()));
    }
    let unit = grid.unit().unwrap_or_default();
    match conversion {
        "kelvin_to_celsius" if unit.contains("[C]") => Some(SkipReason::AlreadyInUnit("[C]".to_string())),
        "kelvin_to_fahrenheit" if unit.contains("[F]") => {
            Some(SkipReason::AlreadyInUnit("[F]".to_string()))
        }
        _ => None,
    }
}

/// Convert every valid sample of `grid` in place, unless the grid is
/// already in the target unit.
///
/// NaN and nodata samples are left untouched. On success the unit tag is
/// rewritten, so calling this twice converts once. On error the grid is
/// unchanged.
pub fn apply_if_needed(
    grid: &mut Grid,
    conversion: &str,
    catalog: &Catalog,
) -> Result<ConversionOutcome, ConversionError> {
    if let Some(reason) = skip_reason(grid, conversion) {
        info!(conversion = %conversion, reason = %reason, "Skipping unit conversion");
        return Ok(ConversionOutcome::Skipped(reason));
    }

    let formula = compile(catalog, conversion)?;
    let nodata = grid.nodata;
    let samples = grid.valid_count();

    // Nothing is written back unless every sample evaluates.
    let converted = grid
        .data
        .par_iter()
        .map(|&v| {
            if v.is_nan() || nodata.is_some_and(|nd| v == nd) {
                Ok(v)
            } else {
                formula.eval(v as f64).map(|out| out as f32)
            }
        })
        .collect::<Result<Vec<f32>, EvalError>>()
        .map_err(|source| ConversionError::ConversionEvaluationError {
            name: conversion.to_string(),
            source,
        })?;
    grid.data = converted;

    let unit = target_unit_tag(conversion);
    grid.metadata.insert(UNIT_KEY.to_string(), unit.clone());
    grid.metadata.insert(CONVERSION_KEY.to_string(), conversion.to_string());

    if let Some((lo, hi)) = grid.value_range() {
        debug!(min = lo, max = hi, "Converted value range");
    }
    info!(conversion = %conversion, samples, unit = %unit, "Applied unit conversion");

    Ok(ConversionOutcome::Converted {
        conversion: conversion.to_string(),
        samples,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::HRRR_CATALOG;
    use tile_common::{BoundingBox, GeoTransform, SpatialRef};

    fn catalog() -> Catalog {
        Catalog::from_yaml_str(HRRR_CATALOG).unwrap()
    }

    fn kelvin_grid(values: Vec<f32>) -> Grid {
        let n = values.len();
        let gt = GeoTransform::from_bounds(&BoundingBox::new(0.0, 0.0, n as f64, 1.0), n, 1);
        let mut grid = Grid::new(values, n, 1, SpatialRef::wgs84(), gt).unwrap();
        grid.metadata.insert(UNIT_KEY.to_string(), "[K]".to_string());
        grid
    }

    #[test]
    fn test_apply_single_value() {
        let c = catalog();
        assert!((apply(&c, 273.15, "kelvin_to_celsius").unwrap()).abs() < 1e-12);
        assert!((apply(&c, 373.15, "kelvin_to_fahrenheit").unwrap() - 212.0).abs() < 1e-9);
        assert!(matches!(
            apply(&c, 1.0, "furlongs_to_parsecs"),
            Err(ConversionError::ConversionNotFound(_))
        ));
    }

    #[test]
    fn test_missing_formula() {
        let c = Catalog::from_yaml_str("model: m\nproduct: p\nconversions:\n  broken: {}\n").unwrap();
        assert!(matches!(
            apply(&c, 1.0, "broken"),
            Err(ConversionError::ConversionFormulaMissing(_))
        ));
    }

    #[test]
    fn test_only_valid_samples_convert() {
        let mut grid = kelvin_grid(vec![273.15, f32::NAN, -9999.0, 283.15]).with_nodata(Some(-9999.0));
        let outcome = apply_if_needed(&mut grid, "kelvin_to_celsius", &catalog()).unwrap();

        assert_eq!(
            outcome,
            ConversionOutcome::Converted {
                conversion: "kelvin_to_celsius".to_string(),
                samples: 2,
                unit: "[C]".to_string(),
            }
        );
        assert!(grid.data[0].abs() < 1e-4);
        assert!(grid.data[1].is_nan());
        assert_eq!(grid.data[2], -9999.0);
        assert!((grid.data[3] - 10.0).abs() < 1e-4);
        assert_eq!(grid.unit(), Some("[C]"));
    }

    #[test]
    fn test_conversion_is_idempotent() {
        let c = catalog();
        let mut once = kelvin_grid(vec![250.0, 300.0]);
        apply_if_needed(&mut once, "kelvin_to_celsius", &c).unwrap();

        let mut twice = once.clone();
        let outcome = apply_if_needed(&mut twice, "kelvin_to_celsius", &c).unwrap();
        assert!(matches!(outcome, ConversionOutcome::Skipped(SkipReason::AlreadyApplied(_))));
        assert_eq!(once, twice);

        let mut mph = kelvin_grid(vec![10.0]);
        apply_if_needed(&mut mph, "ms_to_mph", &c).unwrap();
        let snapshot = mph.clone();
        apply_if_needed(&mut mph, "ms_to_mph", &c).unwrap();
        assert_eq!(mph, snapshot);
        assert_eq!(mph.unit(), Some("[mph]"));
    }

    #[test]
    fn test_celsius_source_is_skipped() {
        let mut grid = kelvin_grid(vec![20.0]);
        grid.metadata.insert(UNIT_KEY.to_string(), "[C]".to_string());
        let outcome = apply_if_needed(&mut grid, "kelvin_to_celsius", &catalog()).unwrap();
        assert_eq!(outcome, ConversionOutcome::Skipped(SkipReason::AlreadyInUnit("[C]".to_string())));
        assert_eq!(grid.data, vec![20.0]);
    }

    #[test]
    fn test_evaluation_error_leaves_tags() {
        let c = Catalog::from_yaml_str("model: m\nproduct: p\nconversions:\n  inv: { formula: \"1 / value\" }\n")
            .unwrap();
        // One bad sample among many, so several workers get a share
        let mut values: Vec<f32> = (1..=8192).map(|i| i as f32).collect();
        values.push(0.0);
        let mut grid = kelvin_grid(values);
        let before = grid.clone();

        let err = apply_if_needed(&mut grid, "inv", &c).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::ConversionEvaluationError {
                source: EvalError::NonFinite { value, .. },
                ..
            } if value == 0.0
        ));
        assert_eq!(grid.unit(), Some("[K]"));
        assert!(!grid.metadata.contains_key(CONVERSION_KEY));
        assert_eq!(grid.data, before.data);
    }

    #[test]
    fn test_target_unit_tag() {
        assert_eq!(target_unit_tag("kelvin_to_celsius"), "[C]");
        assert_eq!(target_unit_tag("ms_to_knots"), "[knots]");
        assert_eq!(target_unit_tag("scale"), "[scale]");
    }
}
