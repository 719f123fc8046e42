//! Band resolution: find the band of a multi-band file that a catalog
//! search pattern (`ELEMENT[:LEVEL]`) refers to.
//!
//! The level part is classified once into a [`LevelMatcher`]; the first
//! band whose element matches and whose level satisfies that matcher wins.
//! Classification order matters: "entire atmosphere" and "surface" are
//! checked before numeric heights, so the `m` inside "atmosphere" can never
//! be read as meters.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;

use grib2_parser::{Grib2File, Grib2Message, Grib2Tables};

use crate::error::ResolutionError;

/// A digit run followed by a meter unit, e.g. `2 m`, `10m`, `80 meters`.
static NUMERIC_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*m(?:eters?)?\b").expect("valid height regex"));

/// A level short name such as `2-htgl`, `0-eatm` or `500-isbl`.
static LEVEL_SHORT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?-[a-z]+\d*$").expect("valid level regex"));

/// The level-identifying metadata of one band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandDescriptor {
    /// 1-based band index.
    pub index: usize,
    /// `GRIB_ELEMENT`, e.g. `TMP`.
    pub element: String,
    /// `GRIB_SHORT_NAME`, e.g. `2-HTGL`.
    pub short_name: String,
    /// Level description, e.g. `2[m] HTGL="Specified height level above ground"`.
    pub description: String,
}

impl BandDescriptor {
    pub fn new(index: usize, element: &str, short_name: &str, description: &str) -> Self {
        Self {
            index,
            element: element.to_string(),
            short_name: short_name.to_string(),
            description: description.to_string(),
        }
    }

    pub fn from_message(index: usize, message: &Grib2Message, tables: &Grib2Tables) -> Self {
        Self {
            index,
            element: message.parameter(tables).element,
            short_name: message.short_name(tables),
            description: message.description(tables),
        }
    }

    /// Descriptors of every band in file order.
    pub fn all(file: &Grib2File) -> Vec<Self> {
        file.bands()
            .map(|(index, msg)| Self::from_message(index, msg, file.tables()))
            .collect()
    }

    fn label(&self) -> String {
        format!("{}/{}", self.element, self.short_name)
    }
}

/// A parsed `ELEMENT[:LEVEL]` search string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPattern {
    pub element: String,
    pub level: Option<String>,
}

impl SearchPattern {
    /// Split on the first `:`. Both parts are trimmed; an empty level is none.
    pub fn parse(pattern: &str) -> Self {
        match pattern.split_once(':') {
            Some((element, level)) => {
                let level = level.trim();
                Self {
                    element: element.trim().to_string(),
                    level: (!level.is_empty()).then(|| level.to_string()),
                }
            }
            None => Self {
                element: pattern.trim().to_string(),
                level: None,
            },
        }
    }
}

impl fmt::Display for SearchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.level {
            Some(level) => write!(f, "{}:{}", self.element, level),
            None => write!(f, "{}", self.element),
        }
    }
}

/// How a level token is compared against a band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelMatcher {
    EntireAtmosphere,
    Surface,
    /// Height above ground in meters.
    NumericHeight(u32),
    /// Exact level short name, lowercased.
    ExactLevel(String),
    /// Lowercased text searched for in the band description.
    SubstringFallback(String),
}

impl LevelMatcher {
    /// Pick the single matcher for a level token.
    pub fn classify(token: &str) -> Self {
        let token = token.trim().to_lowercase();

        if token.contains("entire atmosphere") || token.contains("eatm") {
            return Self::EntireAtmosphere;
        }
        if token.contains("surface") || token.contains("sfc") {
            return Self::Surface;
        }
        if let Some(height) = NUMERIC_HEIGHT
            .captures(&token)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            return Self::NumericHeight(height);
        }
        if LEVEL_SHORT_NAME.is_match(&token) {
            return Self::ExactLevel(token);
        }
        Self::SubstringFallback(token)
    }

    pub fn matches(&self, band: &BandDescriptor) -> bool {
        let short = band.short_name.to_lowercase();
        let description = band.description.to_lowercase();

        match self {
            Self::EntireAtmosphere => short.contains("eatm") || description.contains("entire atmosphere"),
            Self::Surface => short.contains("sfc") || description.contains("surface"),
            // Equality and prefix tests keep "2 m" from matching 12-HTGL.
            Self::NumericHeight(n) => {
                short == format!("{}-htgl", n) || description.starts_with(&format!("{}[m]", n))
            }
            Self::ExactLevel(name) => short == *name,
            Self::SubstringFallback(text) => description.contains(text.as_str()),
        }
    }
}

/// First band of `bands` matching `pattern`.
pub fn find_band_in(bands: &[BandDescriptor], pattern: &str) -> Result<usize, ResolutionError> {
    let search = SearchPattern::parse(pattern);
    let matcher = search.level.as_deref().map(LevelMatcher::classify);
    debug!(pattern = %search, matcher = ?matcher, "Resolving band");

    for band in bands {
        if !band.element.eq_ignore_ascii_case(&search.element) {
            continue;
        }
        let Some(matcher) = &matcher else {
            debug!(band = band.index, element = %band.element, "Element match without level");
            return Ok(band.index);
        };
        if matcher.matches(band) {
            debug!(
                band = band.index,
                short_name = %band.short_name,
                description = %band.description,
                "Level match"
            );
            return Ok(band.index);
        }
        debug!(band = band.index, short_name = %band.short_name, "Element match, level rejected");
    }

    Err(ResolutionError::NotFound {
        pattern: pattern.to_string(),
        inspected: bands.iter().map(BandDescriptor::label).collect(),
    })
}

/// 1-based index of the first band of `file` matching `pattern`.
pub fn find_band(file: &Grib2File, pattern: &str) -> Result<usize, ResolutionError> {
    find_band_in(&BandDescriptor::all(file), pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eatm(index: usize, element: &str) -> BandDescriptor {
        BandDescriptor::new(index, element, "0-EATM", "0[-] EATM=\"Entire Atmosphere\"")
    }

    fn htgl(index: usize, element: &str, meters: u32) -> BandDescriptor {
        BandDescriptor::new(
            index,
            element,
            &format!("{}-HTGL", meters),
            &format!("{}[m] HTGL=\"Specified height level above ground\"", meters),
        )
    }

    fn sfc(index: usize, element: &str) -> BandDescriptor {
        BandDescriptor::new(index, element, "0-SFC", "0[-] SFC=\"Ground or water surface\"")
    }

    #[test]
    fn test_pattern_parse() {
        assert_eq!(
            SearchPattern::parse(" TMP : 2 m "),
            SearchPattern {
                element: "TMP".to_string(),
                level: Some("2 m".to_string())
            }
        );
        assert_eq!(SearchPattern::parse("REFC").level, None);
        assert_eq!(SearchPattern::parse("REFC:").level, None);
        assert_eq!(SearchPattern::parse("A:b:c").level.as_deref(), Some("b:c"));
    }

    #[test]
    fn test_classify_order() {
        assert_eq!(LevelMatcher::classify("entire atmosphere"), LevelMatcher::EntireAtmosphere);
        assert_eq!(LevelMatcher::classify("0-EATM"), LevelMatcher::EntireAtmosphere);
        assert_eq!(LevelMatcher::classify("surface"), LevelMatcher::Surface);
        assert_eq!(LevelMatcher::classify("0-SFC"), LevelMatcher::Surface);
        assert_eq!(LevelMatcher::classify("2 m"), LevelMatcher::NumericHeight(2));
        assert_eq!(LevelMatcher::classify("10m above ground"), LevelMatcher::NumericHeight(10));
        assert_eq!(LevelMatcher::classify("80 meters"), LevelMatcher::NumericHeight(80));
        assert_eq!(LevelMatcher::classify("2-HTGL"), LevelMatcher::ExactLevel("2-htgl".into()));
        assert_eq!(LevelMatcher::classify("500-ISBL"), LevelMatcher::ExactLevel("500-isbl".into()));
        assert_eq!(
            LevelMatcher::classify("500 mb"),
            LevelMatcher::SubstringFallback("500 mb".into())
        );
        assert_eq!(
            LevelMatcher::classify("mean sea level"),
            LevelMatcher::SubstringFallback("mean sea level".into())
        );
    }

    #[test]
    fn test_matcher_variants() {
        assert!(LevelMatcher::EntireAtmosphere.matches(&eatm(1, "REFC")));
        assert!(!LevelMatcher::EntireAtmosphere.matches(&htgl(1, "TMP", 2)));
        assert!(LevelMatcher::Surface.matches(&sfc(1, "GUST")));
        assert!(!LevelMatcher::Surface.matches(&eatm(1, "GUST")));
        assert!(LevelMatcher::NumericHeight(2).matches(&htgl(1, "TMP", 2)));
        assert!(!LevelMatcher::NumericHeight(2).matches(&htgl(1, "TMP", 12)));
        assert!(!LevelMatcher::NumericHeight(2).matches(&eatm(1, "TMP")));
        assert!(LevelMatcher::ExactLevel("10-htgl".into()).matches(&htgl(1, "UGRD", 10)));
        assert!(LevelMatcher::SubstringFallback("ground or water".into()).matches(&sfc(1, "TMP")));
    }

    #[test]
    fn test_height_never_matches_entire_atmosphere() {
        let bands = vec![eatm(1, "TMP"), htgl(2, "TMP", 2)];
        assert_eq!(find_band_in(&bands, "TMP:2 m").unwrap(), 2);
    }

    #[test]
    fn test_entire_atmosphere_never_matches_height() {
        let bands = vec![htgl(1, "TMP", 2), eatm(2, "TMP")];
        assert_eq!(find_band_in(&bands, "TMP:entire atmosphere").unwrap(), 2);
    }

    #[test]
    fn test_height_is_not_a_substring_match() {
        let bands = vec![htgl(1, "TMP", 12), htgl(2, "TMP", 2)];
        assert_eq!(find_band_in(&bands, "TMP:2 m").unwrap(), 2);
    }

    #[test]
    fn test_first_element_match_without_level() {
        let bands = vec![sfc(1, "GUST"), eatm(2, "TMP"), htgl(3, "TMP", 2)];
        assert_eq!(find_band_in(&bands, "tmp").unwrap(), 2);
    }

    #[test]
    fn test_not_found_lists_inspected_bands() {
        let bands = vec![eatm(1, "TMP"), sfc(2, "GUST")];
        match find_band_in(&bands, "DPT:2 m") {
            Err(ResolutionError::NotFound { pattern, inspected }) => {
                assert_eq!(pattern, "DPT:2 m");
                assert_eq!(inspected, vec!["TMP/0-EATM", "GUST/0-SFC"]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_in_grib_file() {
        let file = Grib2File::from_bytes(test_utils::hrrr_bands(280.0).into()).unwrap();
        assert_eq!(find_band(&file, "TMP:2 m").unwrap(), 4);
        assert_eq!(find_band(&file, "TMP:surface").unwrap(), 3);
        assert_eq!(find_band(&file, "TMP:entire atmosphere").unwrap(), 1);
        assert_eq!(find_band(&file, "REFC:entire atmosphere").unwrap(), 2);
        assert_eq!(find_band(&file, "GUST:surface").unwrap(), 5);
        assert_eq!(find_band(&file, "UGRD:10 m above ground").unwrap(), 6);
        assert_eq!(find_band(&file, "UGRD:10-HTGL").unwrap(), 6);
        assert!(find_band(&file, "DPT:2 m").is_err());
    }
}
