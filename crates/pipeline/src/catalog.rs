//! Variable catalog: the declarative YAML file that drives the pipeline.
//!
//! ```yaml
//! model: hrrr
//! product: wrfsfcf
//! processing: { resampling_method: bilinear, tile_size: 512 }
//! variables:
//!   temperature_2m:
//!     grib_search: "TMP:2 m"
//!     display_name: "Temperature (2m)"
//!     units_source: K
//!     units_display: C
//!     conversion: kelvin_to_celsius
//!     color_ramp: temperature
//!     enabled: true
//!     priority: 1
//! color_ramps:
//!   temperature:
//!     colors:
//!       - { value: 0.0, color: "#FFFFFF" }
//! conversions:
//!   kelvin_to_celsius: { formula: "value - 273.15" }
//! ```
//!
//! Loading only fails for a missing file or malformed YAML. Everything else
//! (missing keys, dangling references) is reported by [`Catalog::validate`].

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use grid_processor::{InterpolationMethod, RasterCompression, RasterWriteOptions};

use crate::colorize::build_ramp;
use crate::convert::CompiledFormula;
use crate::error::ConfigurationError;

/// Keys every catalog needs at the top level.
const REQUIRED_KEYS: [&str; 3] = ["model", "product", "variables"];

/// Keys every variable entry needs.
const REQUIRED_VARIABLE_KEYS: [&str; 4] =
    ["grib_search", "display_name", "units_source", "units_display"];

/// Priority assumed when a variable does not declare one.
pub const DEFAULT_PRIORITY: u32 = 999;

/// One weather variable the pipeline can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableDefinition {
    #[serde(skip)]
    pub name: String,
    /// `ELEMENT[:LEVEL]`, e.g. `TMP:2 m`.
    pub grib_search: String,
    pub display_name: String,
    pub units_source: String,
    pub units_display: String,
    pub conversion: Option<String>,
    pub color_ramp: Option<String>,
    pub enabled: bool,
    /// 1 is processed first.
    pub priority: u32,
    pub description: String,
}

impl Default for VariableDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            grib_search: String::new(),
            display_name: String::new(),
            units_source: String::new(),
            units_display: String::new(),
            conversion: None,
            color_ramp: None,
            enabled: false,
            priority: DEFAULT_PRIORITY,
            description: String::new(),
        }
    }
}

/// A threshold and the color it maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub value: f64,
    /// `#RRGGBB`, the `#` is optional.
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorRamp {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "colors", default)]
    pub stops: Vec<ColorStop>,
}

/// A named unit conversion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversionFormula {
    #[serde(skip)]
    pub name: String,
    /// Expression over `value`; empty when the entry has none.
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// The `processing:` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub resampling_method: InterpolationMethod,
    pub target_resolution_meters: Option<f64>,
    pub compression: RasterCompression,
    pub tile_size: usize,
    pub overview_levels: Vec<u32>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let write = RasterWriteOptions::default();
        Self {
            resampling_method: InterpolationMethod::Bilinear,
            target_resolution_meters: None,
            compression: write.compression,
            tile_size: write.tile_size,
            overview_levels: write.overview_factors,
        }
    }
}

impl ProcessingConfig {
    /// Output pixel size in meters; zero or negative means "keep native".
    pub fn target_resolution(&self) -> Option<f64> {
        self.target_resolution_meters.filter(|r| *r > 0.0)
    }

    pub fn write_options(&self) -> RasterWriteOptions {
        RasterWriteOptions {
            compression: self.compression,
            tile_size: self.tile_size,
            overview_factors: self.overview_levels.clone(),
            ..Default::default()
        }
    }
}

/// Model, product and free-form metadata of a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub model: String,
    pub product: String,
    pub metadata: BTreeMap<String, Value>,
}

/// One problem found by [`Catalog::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingKey(String),
    NoVariables,
    MissingVariableKey { variable: String, key: String },
    UndefinedColorRamp { variable: String, ramp: String },
    UndefinedConversion { variable: String, conversion: String },
    InvalidColorRamp { ramp: String, reason: String },
    InvalidConversion { conversion: String, reason: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "Missing required key: {}", key),
            Self::NoVariables => write!(f, "No variables defined"),
            Self::MissingVariableKey { variable, key } => {
                write!(f, "Variable '{}' missing required key: {}", variable, key)
            }
            Self::UndefinedColorRamp { variable, ramp } => {
                write!(f, "Variable '{}' references undefined color ramp: {}", variable, ramp)
            }
            Self::UndefinedConversion { variable, conversion } => write!(
                f,
                "Variable '{}' references undefined conversion: {}",
                variable, conversion
            ),
            Self::InvalidColorRamp { ramp, reason } => {
                write!(f, "Color ramp '{}' is invalid: {}", ramp, reason)
            }
            Self::InvalidConversion { conversion, reason } => {
                write!(f, "Conversion '{}' is invalid: {}", conversion, reason)
            }
        }
    }
}

/// A loaded variable catalog. Immutable once built.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
    raw: Mapping,
    model: Option<String>,
    product: Option<String>,
    metadata: BTreeMap<String, Value>,
    processing: ProcessingConfig,
    /// In file order.
    variables: Vec<VariableDefinition>,
    color_ramps: BTreeMap<String, ColorRamp>,
    conversions: BTreeMap<String, ConversionFormula>,
}

impl Catalog {
    /// Load a catalog from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::ConfigNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigurationError::ConfigParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&contents, path)
    }

    /// Parse a catalog held in memory.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        Self::parse(yaml, Path::new("<memory>"))
    }

    fn parse(yaml: &str, path: &Path) -> Result<Self, ConfigurationError> {
        let parse_error = |message: String| ConfigurationError::ConfigParseError {
            path: path.to_path_buf(),
            message,
        };

        let root: Value = serde_yaml::from_str(yaml).map_err(|e| parse_error(e.to_string()))?;
        let raw = match root {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            other => {
                return Err(parse_error(format!(
                    "top level must be a mapping, found {}",
                    value_kind(&other)
                )))
            }
        };

        let string_field = |key: &str| -> Result<Option<String>, ConfigurationError> {
            match raw.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(parse_error(format!(
                    "'{}' must be a string, found {}",
                    key,
                    value_kind(other)
                ))),
            }
        };
        let model = string_field("model")?;
        let product = string_field("product")?;

        let metadata = match raw.get("metadata") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(v) => serde_yaml::from_value(v.clone())
                .map_err(|e| parse_error(format!("metadata: {}", e)))?,
        };

        let processing = match raw.get("processing") {
            None | Some(Value::Null) => ProcessingConfig::default(),
            Some(v) => serde_yaml::from_value(v.clone())
                .map_err(|e| parse_error(format!("processing: {}", e)))?,
        };

        let mut variables = Vec::new();
        for (name, value) in section_entries(&raw, "variables").map_err(parse_error)? {
            let mut def: VariableDefinition = serde_yaml::from_value(value.clone())
                .map_err(|e| parse_error(format!("variable '{}': {}", name, e)))?;
            def.name = name;
            variables.push(def);
        }

        let mut color_ramps = BTreeMap::new();
        for (name, value) in section_entries(&raw, "color_ramps").map_err(parse_error)? {
            let mut ramp: ColorRamp = serde_yaml::from_value(value.clone())
                .map_err(|e| parse_error(format!("color ramp '{}': {}", name, e)))?;
            ramp.name = name.clone();
            color_ramps.insert(name, ramp);
        }

        let mut conversions = BTreeMap::new();
        for (name, value) in section_entries(&raw, "conversions").map_err(parse_error)? {
            let mut conversion: ConversionFormula = serde_yaml::from_value(value.clone())
                .map_err(|e| parse_error(format!("conversion '{}': {}", name, e)))?;
            conversion.name = name.clone();
            conversions.insert(name, conversion);
        }

        Ok(Self {
            path: path.to_path_buf(),
            raw,
            model,
            product,
            metadata,
            processing,
            variables,
            color_ramps,
            conversions,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enabled variables by name.
    pub fn enabled_variables(&self) -> BTreeMap<&str, &VariableDefinition> {
        self.variables
            .iter()
            .filter(|v| v.enabled)
            .map(|v| (v.name.as_str(), v))
            .collect()
    }

    /// Enabled variables with the given priority; `None` returns all enabled.
    pub fn by_priority(&self, priority: Option<u32>) -> BTreeMap<&str, &VariableDefinition> {
        let mut enabled = self.enabled_variables();
        if let Some(p) = priority {
            enabled.retain(|_, v| v.priority == p);
        }
        enabled
    }

    /// Any variable, enabled or not.
    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Search patterns of the enabled variables, in file order.
    pub fn grib_search_strings(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| v.enabled)
            .map(|v| v.grib_search.as_str())
            .collect()
    }

    pub fn color_ramp(&self, name: &str) -> Option<&ColorRamp> {
        self.color_ramps.get(name)
    }

    pub fn conversion(&self, name: &str) -> Option<&ConversionFormula> {
        self.conversions.get(name)
    }

    pub fn processing(&self) -> &ProcessingConfig {
        &self.processing
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model: self.model.clone().unwrap_or_else(|| "unknown".to_string()),
            product: self.product.clone().unwrap_or_else(|| "unknown".to_string()),
            metadata: self.metadata.clone(),
        }
    }

    /// Every variable name in file order.
    pub fn list_all_variables(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    /// Every issue with the catalog, in one pass. Empty when valid.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for key in REQUIRED_KEYS {
            if !self.raw.contains_key(key) {
                issues.push(ValidationIssue::MissingKey(key.to_string()));
            }
        }
        if self.variables.is_empty() {
            issues.push(ValidationIssue::NoVariables);
        }

        let raw_variables = self.raw.get("variables").and_then(Value::as_mapping);
        for var in &self.variables {
            let entry = raw_variables
                .and_then(|m| m.get(var.name.as_str()))
                .and_then(Value::as_mapping);
            for key in REQUIRED_VARIABLE_KEYS {
                if !entry.is_some_and(|m| m.contains_key(key)) {
                    issues.push(ValidationIssue::MissingVariableKey {
                        variable: var.name.clone(),
                        key: key.to_string(),
                    });
                }
            }

            if let Some(ramp) = var.color_ramp.as_deref().filter(|r| !r.is_empty()) {
                if !self.color_ramps.contains_key(ramp) {
                    issues.push(ValidationIssue::UndefinedColorRamp {
                        variable: var.name.clone(),
                        ramp: ramp.to_string(),
                    });
                }
            }
            if let Some(conversion) = var.conversion.as_deref().filter(|c| !c.is_empty()) {
                if !self.conversions.contains_key(conversion) {
                    issues.push(ValidationIssue::UndefinedConversion {
                        variable: var.name.clone(),
                        conversion: conversion.to_string(),
                    });
                }
            }
        }

        for ramp in self.color_ramps.values() {
            if let Err(e) = build_ramp(ramp) {
                issues.push(ValidationIssue::InvalidColorRamp {
                    ramp: ramp.name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        for conversion in self.conversions.values() {
            let reason = if conversion.formula.trim().is_empty() {
                Some("no formula".to_string())
            } else {
                CompiledFormula::parse(&conversion.formula).err().map(|e| e.to_string())
            };
            if let Some(reason) = reason {
                issues.push(ValidationIssue::InvalidConversion {
                    conversion: conversion.name.clone(),
                    reason,
                });
            }
        }

        issues
    }

    /// Fail with every issue when the catalog is not valid.
    pub fn ensure_valid(&self) -> Result<(), ConfigurationError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidCatalog(issues))
        }
    }

    /// Human report of the catalog, grouping enabled variables by priority.
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let info = self.model_info();
        let enabled = self.enabled_variables();

        let mut out = String::new();
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Weather Variable Configuration Summary");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Model: {}", info.model);
        let _ = writeln!(out, "Product: {}", info.product);
        let _ = writeln!(out, "Total Variables: {}", self.variables.len());
        let _ = writeln!(out, "Enabled Variables: {}", enabled.len());
        let _ = writeln!(out);
        let _ = writeln!(out, "Enabled Variables (by priority):");
        let _ = writeln!(out, "{}", "-".repeat(60));

        let mut groups: BTreeMap<u32, Vec<&VariableDefinition>> = BTreeMap::new();
        for var in enabled.values() {
            groups.entry(var.priority).or_default().push(var);
        }
        for (priority, vars) in groups {
            let _ = writeln!(out, "\nPriority {}:", priority);
            // Already sorted by name: `enabled` is a BTreeMap.
            for var in vars {
                let _ = writeln!(
                    out,
                    "  - {:<25} | {:<30} | {}",
                    var.name, var.display_name, var.grib_search
                );
            }
        }

        let _ = writeln!(out);
        let _ = write!(out, "{}", rule);
        out
    }
}

/// `(name, value)` pairs of a top-level mapping section, in file order.
fn section_entries(raw: &Mapping, key: &str) -> Result<Vec<(String, Value)>, String> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Mapping(m)) => m
            .iter()
            .map(|(k, v)| match k {
                Value::String(name) => Ok((name.clone(), v.clone())),
                other => Err(format!("{} keys must be strings, found {}", key, value_kind(other))),
            })
            .collect(),
        Some(other) => Err(format!("'{}' must be a mapping, found {}", key, value_kind(other))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{write_catalog, CATALOG_WITH_UNDEFINED_RAMP, HRRR_CATALOG};

    fn hrrr() -> Catalog {
        Catalog::from_yaml_str(HRRR_CATALOG).unwrap()
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path(), HRRR_CATALOG);
        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.path(), path.as_path());
        assert!(catalog.validate().is_empty(), "{:?}", catalog.validate());
    }

    #[test]
    fn test_missing_file() {
        let err = Catalog::load("/nonexistent/variables.yaml").unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigNotFound(_)));
    }

    #[test]
    fn test_malformed_yaml_and_wrong_types() {
        let err = Catalog::from_yaml_str("model: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigParseError { .. }));

        let err = Catalog::from_yaml_str("model: hrrr\nvariables:\n  t:\n    priority: high\n")
            .unwrap_err();
        assert!(err.to_string().contains("variable 't'"));

        let err = Catalog::from_yaml_str("- a\n- b\n").unwrap_err();
        assert!(err.to_string().contains("top level must be a mapping"));
    }

    #[test]
    fn test_enabled_and_priority() {
        let catalog = hrrr();
        let enabled: Vec<_> = catalog.enabled_variables().into_keys().collect();
        assert_eq!(enabled, vec!["composite_reflectivity", "temperature_2m", "wind_gust"]);

        let p1: Vec<_> = catalog.by_priority(Some(1)).into_keys().collect();
        assert_eq!(p1, vec!["composite_reflectivity", "temperature_2m"]);
        assert_eq!(catalog.by_priority(None).len(), 3);
        assert!(catalog.by_priority(Some(3)).is_empty());
    }

    #[test]
    fn test_lookups() {
        let catalog = hrrr();
        assert_eq!(
            catalog.list_all_variables(),
            vec!["temperature_2m", "composite_reflectivity", "wind_gust", "dewpoint_2m"]
        );
        assert_eq!(
            catalog.grib_search_strings(),
            vec!["TMP:2 m", "REFC:entire atmosphere", "GUST:surface"]
        );
        assert!(!catalog.variable("dewpoint_2m").unwrap().enabled);
        assert_eq!(catalog.color_ramp("temperature").unwrap().stops.len(), 5);
        assert_eq!(catalog.conversion("ms_to_mph").unwrap().formula, "value * 2.23694");

        let info = catalog.model_info();
        assert_eq!(info.model, "hrrr");
        assert_eq!(info.product, "wrfsfcf");
        assert_eq!(info.metadata["update_frequency"], Value::from("hourly"));
    }

    #[test]
    fn test_processing_block() {
        let processing = hrrr().processing().clone();
        assert_eq!(processing.resampling_method, InterpolationMethod::Bilinear);
        assert_eq!(processing.target_resolution(), None);
        assert_eq!(processing.tile_size, 256);

        let options = processing.write_options();
        assert_eq!(options.overview_factors, vec![2, 4]);
        assert_eq!(options.compression, RasterCompression::Deflate);

        let catalog = Catalog::from_yaml_str("model: x\nproduct: y\nvariables: {}\n").unwrap();
        assert_eq!(catalog.processing(), &ProcessingConfig::default());
        assert_eq!(catalog.processing().overview_levels, vec![2, 4, 8, 16]);
    }

    #[test]
    fn test_variable_defaults() {
        let catalog = Catalog::from_yaml_str(
            "model: x\nproduct: y\nvariables:\n  v:\n    grib_search: \"A\"\n",
        )
        .unwrap();
        let v = catalog.variable("v").unwrap();
        assert!(!v.enabled);
        assert_eq!(v.priority, DEFAULT_PRIORITY);
        assert_eq!(v.conversion, None);
    }

    #[test]
    fn test_undefined_ramp_is_one_issue() {
        let catalog = Catalog::from_yaml_str(CATALOG_WITH_UNDEFINED_RAMP).unwrap();
        let issues = catalog.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].to_string(),
            "Variable 'temperature_2m' references undefined color ramp: no_such_ramp"
        );
        assert!(matches!(
            catalog.ensure_valid(),
            Err(ConfigurationError::InvalidCatalog(ref v)) if v.len() == 1
        ));
    }

    #[test]
    fn test_structural_issues() {
        let catalog = Catalog::from_yaml_str(
            r##"
product: p
variables:
  bare:
    conversion: nope
color_ramps:
  backwards:
    colors:
      - { value: 10, color: "#000000" }
      - { value: 0, color: "#FFFFFF" }
  badhex:
    colors:
      - { value: 0, color: "#GG0000" }
conversions:
  empty: {}
  evil: { formula: "__import__('os')" }
"##,
        )
        .unwrap();

        let messages: Vec<String> = catalog.validate().iter().map(ToString::to_string).collect();
        assert_eq!(messages[0], "Missing required key: model");
        assert_eq!(messages[1], "Variable 'bare' missing required key: grib_search");
        assert_eq!(messages[4], "Variable 'bare' missing required key: units_display");
        assert_eq!(messages[5], "Variable 'bare' references undefined conversion: nope");
        assert!(messages[6].starts_with("Color ramp 'backwards' is invalid"));
        assert!(messages[7].starts_with("Color ramp 'badhex' is invalid"));
        assert_eq!(messages[8], "Conversion 'empty' is invalid: no formula");
        assert!(messages[9].starts_with("Conversion 'evil' is invalid"));
        assert_eq!(messages.len(), 10);
    }

    #[test]
    fn test_no_variables() {
        let catalog = Catalog::from_yaml_str("model: m\nproduct: p\n").unwrap();
        let messages: Vec<String> = catalog.validate().iter().map(ToString::to_string).collect();
        assert_eq!(messages, vec!["Missing required key: variables", "No variables defined"]);
    }

    #[test]
    fn test_summary_groups_by_priority() {
        let summary = hrrr().summary();
        assert!(summary.contains("Model: hrrr"));
        assert!(summary.contains("Total Variables: 4"));
        assert!(summary.contains("Enabled Variables: 3"));

        let p1 = summary.find("Priority 1:").unwrap();
        let p2 = summary.find("Priority 2:").unwrap();
        let refc = summary.find("  - composite_reflectivity").unwrap();
        let tmp = summary.find("  - temperature_2m").unwrap();
        let gust = summary.find("  - wind_gust").unwrap();
        assert!(p1 < refc && refc < tmp && tmp < p2 && p2 < gust);
        assert!(!summary.contains("dewpoint_2m"));
        assert!(summary.contains(&format!("  - {:<25} | {:<30} | {}", "wind_gust", "Wind Gust", "GUST:surface")));
    }
}
