//! Weather tile pipeline service.
//!
//! Turns GRIB2 model output into colorized XYZ tile trees using the
//! variable catalog: `process` writes Web Mercator rasters, `colorize`
//! applies color ramps, `tile` slices and publishes, `run` chains all three.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{RuntimeArgs, TilerConfig};
use pipeline::{
    colorize_file, process_file, resolve_variables, select_variables, tile_file, BatchSummary,
    Catalog, Stage, TileOptions, VariableDefinition,
};
use tile_common::ZoomRange;

#[derive(Parser, Debug)]
#[command(name = "tiler")]
#[command(about = "GRIB2 to XYZ weather tile pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    runtime: RuntimeArgs,

    /// Log level
    #[arg(long, global = true, default_value = "info", env = "TILER_LOG_LEVEL")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct VariableArgs {
    /// Only variables with this priority
    #[arg(long)]
    priority: Option<u32>,

    /// Comma-separated variable names (overrides --priority)
    #[arg(long, value_delimiter = ',')]
    variables: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
struct TileArgs {
    /// Zoom levels, e.g. "0-10" or "5"
    #[arg(long, default_value = "0-10")]
    zoom: ZoomRange,

    /// Tile rendering workers
    #[arg(long, default_value_t = 4)]
    processes: usize,

    /// Skip fully transparent tiles
    #[arg(long)]
    exclude_transparent: bool,

    /// Keep tiles already published
    #[arg(long)]
    resume: bool,

    /// PNG deflate level (0-9)
    #[arg(long, default_value_t = renderer::DEFAULT_PNG_LEVEL)]
    png_level: u32,

    /// Render tiles under /dev/shm
    #[arg(long)]
    use_ramdisk: bool,

    /// Publish under the raster name instead of {variable}/{run}/{hour}
    #[arg(long)]
    no_organize: bool,
}

impl TileArgs {
    fn options(&self, config: &TilerConfig) -> Result<TileOptions> {
        if self.png_level > 9 {
            bail!("png-level must be between 0 and 9");
        }
        Ok(TileOptions {
            processes: self.processes.max(1),
            exclude_transparent: self.exclude_transparent,
            resume: self.resume,
            png_level: self.png_level,
            use_ramdisk: self.use_ramdisk,
            organize: !self.no_organize,
            io: config.io.clone(),
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the variable catalog and print a summary
    Validate,

    /// Extract, convert and reproject catalog variables from GRIB2 files
    Process {
        /// GRIB2 files (.grib2, .grib2.gz)
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Directory for processed rasters
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        variables: VariableArgs,
    },

    /// Apply color ramps to processed rasters
    Colorize {
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Directory for colored rasters
        #[arg(long)]
        output: PathBuf,

        /// Variable name (default: taken from each raster)
        #[arg(long)]
        variable: Option<String>,
    },

    /// Slice colored rasters into XYZ tiles
    Tile {
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Tiles root directory
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        tiles: TileArgs,
    },

    /// Process, colorize and tile GRIB2 files in one go
    Run {
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Work directory; gets processed/, colored/ and tiles/
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        variables: VariableArgs,

        #[command(flatten)]
        tiles: TileArgs,
    },
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn pick_variables<'a>(catalog: &'a Catalog, args: &VariableArgs) -> Result<Vec<&'a VariableDefinition>> {
    let variables = if args.variables.is_empty() {
        resolve_variables(catalog, args.priority)
    } else {
        select_variables(catalog, &args.variables)?
    };
    if variables.is_empty() {
        bail!("no variables selected");
    }
    Ok(variables)
}

/// Run `job` for every input on the blocking pool, at most `jobs` at a time.
async fn for_each_input<F>(inputs: Vec<PathBuf>, jobs: usize, job: F) -> BatchSummary
where
    F: Fn(&Path) -> BatchSummary + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let summaries: Vec<BatchSummary> = stream::iter(inputs)
        .map(|input| {
            let job = job.clone();
            async move {
                let path = input.clone();
                match tokio::task::spawn_blocking(move || job(&input)).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!(file = %path.display(), error = %e, "Job panicked");
                        let mut summary = BatchSummary::new();
                        summary.record(Stage::Resolve, false);
                        summary
                    }
                }
            }
        })
        .buffer_unordered(jobs)
        .collect()
        .await;

    let mut total = BatchSummary::new();
    for summary in &summaries {
        total.merge(summary);
    }
    total
}

fn process_one(
    source: &Path,
    catalog: &Catalog,
    variables: &[String],
    config: &TilerConfig,
    output: &Path,
) -> (Vec<PathBuf>, BatchSummary) {
    let defs: Vec<&VariableDefinition> = variables.iter().filter_map(|v| catalog.variable(v)).collect();
    match process_file(source, &defs, catalog, output, &config.process_options()) {
        Ok(outcome) => (outcome.outputs.into_values().collect(), outcome.summary),
        Err(e) => {
            error!(file = %source.display(), error = %e, "Failed to process file");
            let mut summary = BatchSummary::new();
            summary.record(Stage::Resolve, false);
            (Vec::new(), summary)
        }
    }
}

fn colorize_one(
    raster: &Path,
    variable: Option<&str>,
    catalog: &Catalog,
    output: &Path,
    summary: &mut BatchSummary,
) -> Option<PathBuf> {
    let result = colorize_file(raster, variable, catalog, output);
    summary.record(Stage::Colorize, result.is_ok());
    match result {
        Ok(path) => Some(path),
        Err(e) => {
            error!(raster = %raster.display(), error = %e, "Failed to colorize raster");
            None
        }
    }
}

fn tile_one(colored: &Path, output: &Path, zoom: ZoomRange, options: &TileOptions, summary: &mut BatchSummary) {
    let result = tile_file(colored, output, zoom, options);
    summary.record(Stage::Tile, result.is_ok());
    if let Err(e) = result {
        error!(raster = %colored.display(), error = %e, "Failed to tile raster");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level, args.json)?;

    let config = TilerConfig::from_args(&args.runtime)?;
    info!(
        catalog = %config.catalog_path.display(),
        io_threads = config.io.effective_threads(),
        cache_mb = config.io.cache_mb,
        jobs = config.jobs,
        "Starting tiler"
    );

    let catalog = match &args.command {
        Command::Validate => {
            let catalog = Catalog::load(&config.catalog_path)
                .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?;
            let issues = catalog.validate();
            println!("{}", catalog.summary());
            if issues.is_empty() {
                println!("Configuration is valid");
                return Ok(());
            }
            for issue in &issues {
                println!("  - {}", issue);
            }
            bail!("{} validation issues", issues.len());
        }
        _ => Arc::new(config.load_catalog()?),
    };

    let summary = match args.command {
        Command::Validate => unreachable!("handled above"),

        Command::Process { input, output, variables } => {
            let names = names_of(&pick_variables(&catalog, &variables)?);
            let config = config.clone();
            for_each_input(input, config.jobs, move |source| {
                process_one(source, &catalog, &names, &config, &output).1
            })
            .await
        }

        Command::Colorize { input, output, variable } => {
            for_each_input(input, config.jobs, move |raster| {
                let mut summary = BatchSummary::new();
                colorize_one(raster, variable.as_deref(), &catalog, &output, &mut summary);
                summary
            })
            .await
        }

        Command::Tile { input, output, tiles } => {
            let options = tiles.options(&config)?;
            let zoom = tiles.zoom;
            for_each_input(input, config.jobs, move |colored| {
                let mut summary = BatchSummary::new();
                tile_one(colored, &output, zoom, &options, &mut summary);
                summary
            })
            .await
        }

        Command::Run { input, output, variables, tiles } => {
            let names = names_of(&pick_variables(&catalog, &variables)?);
            let options = tiles.options(&config)?;
            let zoom = tiles.zoom;
            let config = config.clone();
            for_each_input(input, config.jobs, move |source| {
                let (rasters, mut summary) =
                    process_one(source, &catalog, &names, &config, &output.join("processed"));
                for raster in rasters {
                    let Some(colored) =
                        colorize_one(&raster, None, &catalog, &output.join("colored"), &mut summary)
                    else {
                        continue;
                    };
                    tile_one(&colored, &output.join("tiles"), zoom, &options, &mut summary);
                }
                summary
            })
            .await
        }
    };

    if summary.is_clean() {
        info!(summary = %summary, "Done");
        Ok(())
    } else {
        warn!(summary = %summary, "Finished with failures");
        bail!("{} stage failures ({})", summary.total_failed(), summary)
    }
}

fn names_of(variables: &[&VariableDefinition]) -> Vec<String> {
    variables.iter().map(|v| v.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::HRRR_CATALOG;

    #[test]
    fn test_parse_tile_command() {
        let args = Args::try_parse_from([
            "tiler",
            "tile",
            "--input",
            "a_colored.zarr",
            "b_colored.zarr",
            "--output",
            "tiles",
            "--zoom",
            "0-4",
            "--exclude-transparent",
            "--no-organize",
            "--jobs",
            "3",
        ])
        .unwrap();
        assert_eq!(args.runtime.jobs, 3);
        let Command::Tile { input, tiles, .. } = args.command else {
            panic!("expected tile command");
        };
        assert_eq!(input.len(), 2);
        assert_eq!(tiles.zoom, "0-4".parse::<ZoomRange>().unwrap());

        let config = TilerConfig::from_args(&args.runtime).unwrap();
        let options = tiles.options(&config).unwrap();
        assert!(options.exclude_transparent);
        assert!(!options.organize);
        assert_eq!(options.png_level, renderer::DEFAULT_PNG_LEVEL);
    }

    #[test]
    fn test_png_level_bounds() {
        let args =
            Args::try_parse_from(["tiler", "tile", "--input", "x", "--output", "y", "--png-level", "12"])
                .unwrap();
        let config = TilerConfig::from_args(&args.runtime).unwrap();
        let Command::Tile { tiles, .. } = args.command else {
            panic!("expected tile command");
        };
        assert!(tiles.options(&config).is_err());
    }

    #[test]
    fn test_pick_variables() {
        let catalog = Catalog::from_yaml_str(HRRR_CATALOG).unwrap();
        let by_priority = VariableArgs {
            priority: Some(2),
            variables: vec![],
        };
        assert_eq!(names_of(&pick_variables(&catalog, &by_priority).unwrap()), vec!["wind_gust"]);

        let by_name = VariableArgs {
            priority: Some(2),
            variables: vec!["temperature_2m".to_string()],
        };
        assert_eq!(names_of(&pick_variables(&catalog, &by_name).unwrap()), vec!["temperature_2m"]);

        let none = VariableArgs {
            priority: Some(7),
            variables: vec![],
        };
        assert!(pick_variables(&catalog, &none).is_err());
    }

    #[test]
    fn test_for_each_input_merges_summaries() {
        let inputs = vec![PathBuf::from("ok-1"), PathBuf::from("bad"), PathBuf::from("ok-2")];
        let summary = tokio_test::block_on(for_each_input(inputs, 2, |path| {
            let mut summary = BatchSummary::new();
            summary.record(Stage::Tile, path.to_string_lossy().starts_with("ok"));
            summary
        }));
        assert_eq!(summary.stage(Stage::Tile).attempted, 3);
        assert_eq!(summary.stage(Stage::Tile).failed, 1);
    }
}
