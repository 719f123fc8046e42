//! Batch entry points: GRIB2 file to rasters, rasters to colored rasters,
//! colored rasters to published tiles.

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use grib2_parser::Grib2File;
use grid_processor::{RasterIoConfig, RasterReader};
use renderer::ReliefMode;
use tile_common::ZoomRange;

use crate::catalog::{Catalog, VariableDefinition};
use crate::colorize::{colorize_raster, ramp_for_variable, VARIABLE_KEY};
use crate::convert::apply_if_needed;
use crate::error::{ColorError, PipelineError, Result};
use crate::naming::{colored_name, processed_name, stem_of, FileNameInfo};
use crate::resolver::find_band;
use crate::slicer::{
    check_srs, copy_tree, generate_tiles, organize, publish_tree, repair_srs, SrsStatus, TileOptions,
};
use crate::summary::{BatchSummary, Stage};
use crate::transform::{extract, open_source, reproject, write_tiled};
use crate::warp::{GdalWarp, WarpBackend};

/// Enabled variables, optionally only those with `priority`, ordered by
/// priority then name.
pub fn resolve_variables(catalog: &Catalog, priority: Option<u32>) -> Vec<&VariableDefinition> {
    let mut variables: Vec<&VariableDefinition> = catalog.by_priority(priority).into_values().collect();
    variables.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
    variables
}

/// Variables picked by name, enabled or not.
pub fn select_variables<'a, S: AsRef<str>>(
    catalog: &'a Catalog,
    names: &[S],
) -> Result<Vec<&'a VariableDefinition>> {
    names
        .iter()
        .map(|name| {
            let name = name.as_ref().trim();
            catalog
                .variable(name)
                .ok_or_else(|| ColorError::UnknownVariable(name.to_string()).into())
        })
        .collect()
}

/// Settings for [`process_file`].
#[derive(Clone)]
pub struct ProcessOptions {
    pub io: RasterIoConfig,
    /// Used when a grid's projection cannot be reprojected in memory.
    pub warp: Arc<dyn WarpBackend>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            io: RasterIoConfig::default(),
            warp: Arc::new(GdalWarp::default()),
        }
    }
}

impl std::fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("io", &self.io)
            .field("warp", &self.warp.name())
            .finish()
    }
}

/// Result of [`process_file`]. Failures are per variable.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub outputs: BTreeMap<String, PathBuf>,
    pub failures: BTreeMap<String, PipelineError>,
    pub summary: BatchSummary,
}

/// Record the outcome of one stage and pass the result through.
fn staged<T, E: Into<PipelineError>>(
    summary: &mut BatchSummary,
    stage: Stage,
    result: std::result::Result<T, E>,
) -> Result<T> {
    summary.record(stage, result.is_ok());
    result.map_err(Into::into)
}

fn process_variable(
    file: &Grib2File,
    def: &VariableDefinition,
    catalog: &Catalog,
    source: &Path,
    output_dir: &Path,
    warp: &dyn WarpBackend,
    summary: &mut BatchSummary,
) -> Result<PathBuf> {
    let processing = catalog.processing();

    // Finding the band and decoding it count as one resolve attempt.
    let resolved = find_band(file, &def.grib_search)
        .map_err(PipelineError::from)
        .and_then(|band| Ok((band, extract(file, band)?)));
    let (band, mut grid) = staged(summary, Stage::Resolve, resolved)?;
    info!(variable = %def.name, band, file = %source.display(), "Resolved band");

    if let Some(conversion) = def.conversion.as_deref() {
        staged(summary, Stage::Convert, apply_if_needed(&mut grid, conversion, catalog))?;
    }

    let mut mercator = staged(
        summary,
        Stage::Reproject,
        reproject(
            &grid,
            processing.resampling_method,
            processing.target_resolution(),
            warp,
        ),
    )?;
    mercator
        .metadata
        .insert(VARIABLE_KEY.to_string(), def.name.clone());

    let output = output_dir.join(format!("{}.zarr", processed_name(&def.name, source)));
    staged(
        summary,
        Stage::Write,
        write_tiled(&mercator, &output, &processing.write_options()),
    )?;
    Ok(output)
}

/// Produce one Web Mercator raster per variable from a GRIB2 file.
///
/// The file is parsed once. Variables run in parallel on a pool sized by
/// `options.io`; a variable that fails is logged and reported in
/// [`ProcessOutcome::failures`] without stopping the others.
pub fn process_file(
    source: &Path,
    variables: &[&VariableDefinition],
    catalog: &Catalog,
    output_dir: &Path,
    options: &ProcessOptions,
) -> Result<ProcessOutcome> {
    let file = open_source(source)?;
    fs::create_dir_all(output_dir)?;
    let pool = options
        .io
        .thread_pool(None)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    info!(
        file = %source.display(),
        bands = file.band_count(),
        variables = variables.len(),
        "Processing GRIB2 file"
    );

    let results: Vec<(String, Result<PathBuf>, BatchSummary)> = pool.install(|| {
        variables
            .par_iter()
            .map(|def| {
                let mut summary = BatchSummary::new();
                let result = process_variable(
                    &file,
                    def,
                    catalog,
                    source,
                    output_dir,
                    options.warp.as_ref(),
                    &mut summary,
                );
                (def.name.clone(), result, summary)
            })
            .collect()
    });

    let mut outcome = ProcessOutcome::default();
    for (name, result, summary) in results {
        outcome.summary.merge(&summary);
        match result {
            Ok(path) => {
                info!(variable = %name, output = %path.display(), "Variable processed");
                outcome.outputs.insert(name, path);
            }
            Err(e) => {
                error!(variable = %name, file = %source.display(), error = %e, "Variable failed");
                outcome.failures.insert(name, e);
            }
        }
    }

    info!(file = %source.display(), summary = %outcome.summary, "File processed");
    Ok(outcome)
}

fn variable_of(raster: &Path) -> Option<String> {
    if let Some(name) = RasterReader::open(raster)
        .ok()
        .and_then(|r| r.attributes().metadata.get(VARIABLE_KEY).cloned())
    {
        return Some(name);
    }
    FileNameInfo::from_path(raster).ok().map(|info| info.variable)
}

/// Colorize a processed raster with its variable's ramp, writing
/// `{stem}_colored.zarr` into `output_dir`.
///
/// Without `variable`, the name recorded in the raster (or its file name)
/// is used.
pub fn colorize_file(
    raster: &Path,
    variable: Option<&str>,
    catalog: &Catalog,
    output_dir: &Path,
) -> Result<PathBuf> {
    let variable = match variable {
        Some(v) => v.to_string(),
        None => variable_of(raster)
            .ok_or_else(|| ColorError::UnknownVariable(raster.display().to_string()))?,
    };
    let ramp = ramp_for_variable(catalog, &variable)?;

    fs::create_dir_all(output_dir)?;
    let output = output_dir.join(format!("{}.zarr", colored_name(raster)));
    let options = catalog.processing().write_options();

    colorize_raster(raster, &output, ramp, ReliefMode::default(), &options)?;
    info!(variable = %variable, output = %output.display(), "Raster colorized");
    Ok(output)
}

/// Slice a colored raster into XYZ tiles and publish them.
///
/// With `options.organize` the tiles land in
/// `{output_dir}/{variable}/{date}T{cycle}/{forecast}`, otherwise in
/// `{output_dir}/{stem}`. Returns the published directory.
pub fn tile_file(
    colored: &Path,
    output_dir: &Path,
    zoom: ZoomRange,
    options: &TileOptions,
) -> Result<PathBuf> {
    let info = if options.organize {
        Some(FileNameInfo::from_path(colored)?)
    } else {
        None
    };
    if let Some(info) = info.as_ref().filter(|info| !info.is_complete()) {
        warn!(
            raster = %colored.display(),
            tiles = %info.tile_dir(output_dir).display(),
            "No model run in raster name, publishing under unknown run and forecast"
        );
    }

    fs::create_dir_all(output_dir)?;
    let scratch = tempfile::Builder::new()
        .prefix(".tiling-")
        .tempdir_in(output_dir)?;

    let source = match check_srs(colored)? {
        SrsStatus::Valid => colored.to_path_buf(),
        SrsStatus::NeedsRepair(reason) => {
            warn!(raster = %colored.display(), reason = %reason, "Repairing spatial reference before tiling");
            repair_srs(colored, scratch.path())?
        }
    };

    let target = match &info {
        Some(info) => info.tile_dir(output_dir),
        None => output_dir.join(stem_of(colored)),
    };

    let tiles = scratch.path().join("tiles");
    if options.resume && target.is_dir() {
        // Seed scratch with the published tree so existing tiles are skipped
        copy_tree(&target, &tiles)?;
    }
    let stats = generate_tiles(&source, &tiles, zoom, options)?;

    let published = match &info {
        Some(info) => organize(&tiles, output_dir, info)?,
        None => {
            publish_tree(&tiles, &target)?;
            target
        }
    };

    info!(
        raster = %colored.display(),
        tiles = %published.display(),
        written = stats.written,
        per_zoom = ?stats.per_zoom,
        "Tiles published"
    );
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;
    use test_utils::{write_hrrr_file, HRRR_CATALOG};

    fn catalog() -> Catalog {
        Catalog::from_yaml_str(HRRR_CATALOG).unwrap()
    }

    #[test]
    fn test_resolve_variables_order() {
        let c = catalog();
        let names: Vec<&str> = resolve_variables(&c, None).iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["composite_reflectivity", "temperature_2m", "wind_gust"]);

        let p2: Vec<&str> = resolve_variables(&c, Some(2)).iter().map(|v| v.name.as_str()).collect();
        assert_eq!(p2, vec!["wind_gust"]);
        assert!(resolve_variables(&c, Some(9)).is_empty());
    }

    #[test]
    fn test_select_variables() {
        let c = catalog();
        let picked = select_variables(&c, &["dewpoint_2m", " wind_gust"]).unwrap();
        assert_eq!(picked.len(), 2);
        assert!(!picked[0].enabled);

        let err = select_variables(&c, &["nope"]).unwrap_err();
        assert!(matches!(err, PipelineError::Color(ColorError::UnknownVariable(_))));
    }

    #[test]
    fn test_process_file_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_hrrr_file(dir.path(), 273.15);
        let out = dir.path().join("out");
        let c = catalog();

        // dewpoint has no band in the file
        let variables = select_variables(&c, &["temperature_2m", "dewpoint_2m", "wind_gust"]).unwrap();
        let outcome = process_file(&source, &variables, &c, &out, &ProcessOptions::default()).unwrap();

        assert_eq!(
            outcome.outputs["temperature_2m"],
            out.join("temperature_2m_hrrr.20260110.t19z.f06.zarr")
        );
        assert!(outcome.outputs["wind_gust"].exists());
        assert!(matches!(
            outcome.failures["dewpoint_2m"],
            PipelineError::Resolution(ResolutionError::NotFound { .. })
        ));
        assert_eq!(outcome.summary.stage(Stage::Write).succeeded, 2);

        // One resolve attempt per variable
        let resolve = outcome.summary.stage(Stage::Resolve);
        assert_eq!(resolve.attempted, variables.len());
        assert_eq!(resolve.succeeded, 2);
        assert_eq!(resolve.failed, 1);
        assert_eq!(outcome.summary.stage(Stage::Convert).attempted, 2);

        let reader = RasterReader::open(&outcome.outputs["wind_gust"]).unwrap();
        let attrs = reader.attributes();
        assert_eq!(attrs.crs.as_deref(), Some("EPSG:3857"));
        assert_eq!(attrs.metadata[VARIABLE_KEY], "wind_gust");
        assert_eq!(attrs.metadata[grid_processor::UNIT_KEY], "[mph]");
        assert_eq!(attrs.tile_size, 256);
    }

    #[test]
    fn test_process_file_unreadable_source() {
        let dir = tempfile::tempdir().unwrap();
        let c = catalog();
        let err = process_file(
            &dir.path().join("missing.grib2"),
            &resolve_variables(&c, None),
            &c,
            dir.path(),
            &ProcessOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Resolution(ResolutionError::SourceUnreadable { .. })
        ));
    }

    #[test]
    fn test_colorize_file_infers_variable() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_hrrr_file(dir.path(), 273.15);
        let c = catalog();
        let variables = select_variables(&c, &["composite_reflectivity"]).unwrap();
        let outcome = process_file(&source, &variables, &c, dir.path(), &ProcessOptions::default()).unwrap();
        let raster = &outcome.outputs["composite_reflectivity"];

        let colored = colorize_file(raster, None, &c, &dir.path().join("colored")).unwrap();
        assert_eq!(
            colored,
            dir.path()
                .join("colored/composite_reflectivity_hrrr.20260110.t19z.f06_colored.zarr")
        );
        let attrs = RasterReader::open(&colored).unwrap().attributes().clone();
        assert_eq!(attrs.band_count, 4);
        assert_eq!(attrs.metadata["color_ramp"], "reflectivity");

        // Overviews follow the catalog's [2, 4], not the writer default
        let processed = RasterReader::open(raster).unwrap().attributes().clone();
        assert_eq!(attrs.overview_factors, processed.overview_factors);
        assert!(attrs.overview_factors.iter().all(|f| [2, 4].contains(f)));
        assert_eq!(attrs.tile_size, 256);

        let err = colorize_file(raster, Some("nope"), &c, dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Color(ColorError::UnknownVariable(_))));
    }

    #[test]
    fn test_tile_file_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_hrrr_file(dir.path(), 273.15);
        let c = catalog();
        let variables = select_variables(&c, &["temperature_2m"]).unwrap();
        let outcome = process_file(&source, &variables, &c, dir.path(), &ProcessOptions::default()).unwrap();
        let colored = colorize_file(&outcome.outputs["temperature_2m"], None, &c, dir.path()).unwrap();

        // Only the variable and a model-like token survive in this name
        let renamed = dir.path().join("temperature_2m_hrrrx_colored.zarr");
        fs::rename(&colored, &renamed).unwrap();

        let tiles = dir.path().join("tiles");
        let zoom: ZoomRange = "0".parse().unwrap();
        let published = tile_file(&renamed, &tiles, zoom, &TileOptions::default()).unwrap();
        assert_eq!(published, tiles.join("temperature_2m/unknownTunknown/unknown"));
        assert!(published.join("0/0/0.png").exists());
    }
}
