//! Tiler runtime configuration.

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use std::path::PathBuf;

use grid_processor::RasterIoConfig;
use pipeline::{Catalog, GdalWarp, ProcessOptions};

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct RuntimeArgs {
    /// Variable catalog (YAML)
    #[arg(long, global = true, default_value = "config/variables.yaml", env = "TILER_CONFIG")]
    pub config: PathBuf,

    /// Raster worker threads, or ALL_CPUS
    #[arg(long, global = true, env = "RASTER_IO_THREADS")]
    pub io_threads: Option<String>,

    /// Memory budget for decoded raster levels, in megabytes
    #[arg(long, global = true, env = "RASTER_IO_CACHE_MB")]
    pub io_cache_mb: Option<usize>,

    /// Files processed at the same time
    #[arg(long, global = true, default_value_t = 2, env = "TILER_JOBS")]
    pub jobs: usize,

    /// External reprojection program
    #[arg(long, global = true, default_value = "gdalwarp", env = "TILER_GDALWARP")]
    pub gdalwarp: PathBuf,
}

/// Settings resolved once at startup and shared by every job.
#[derive(Debug, Clone)]
pub struct TilerConfig {
    pub catalog_path: PathBuf,
    pub io: RasterIoConfig,
    pub jobs: usize,
    pub gdalwarp: PathBuf,
}

fn parse_threads(value: &str) -> Result<Option<usize>> {
    if value.eq_ignore_ascii_case("all_cpus") {
        return Ok(None);
    }
    let threads: usize = value
        .trim()
        .parse()
        .with_context(|| format!("invalid thread count '{}'", value))?;
    Ok(Some(threads))
}

impl TilerConfig {
    pub fn from_args(args: &RuntimeArgs) -> Result<Self> {
        let mut io = RasterIoConfig::default();
        if let Some(threads) = &args.io_threads {
            io.threads = parse_threads(threads)?;
        }
        if let Some(cache_mb) = args.io_cache_mb {
            io.cache_mb = cache_mb;
        }
        io.validate().map_err(|e| anyhow!("raster I/O: {}", e))?;

        if args.jobs == 0 {
            bail!("jobs must be > 0");
        }

        Ok(Self {
            catalog_path: args.config.clone(),
            io,
            jobs: args.jobs,
            gdalwarp: args.gdalwarp.clone(),
        })
    }

    /// Load the catalog and refuse to run with validation issues.
    pub fn load_catalog(&self) -> Result<Catalog> {
        let catalog = Catalog::load(&self.catalog_path)
            .with_context(|| format!("loading catalog {}", self.catalog_path.display()))?;
        catalog.ensure_valid()?;
        Ok(catalog)
    }

    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            io: self.io.clone(),
            warp: std::sync::Arc::new(GdalWarp::new(&self.gdalwarp)),
        }
    }
}
