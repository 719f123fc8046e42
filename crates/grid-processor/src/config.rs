//! Configuration for raster I/O.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{GridProcessorError, Result};

/// Process-wide raster I/O tuning, built once at startup and passed down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterIoConfig {
    /// Worker threads for CPU-bound raster work. `None` uses every core.
    pub threads: Option<usize>,

    /// Memory budget in megabytes for decoded raster levels kept around
    /// while tiling.
    pub cache_mb: usize,
}

impl Default for RasterIoConfig {
    fn default() -> Self {
        Self {
            threads: None,
            cache_mb: 512,
        }
    }
}

impl RasterIoConfig {
    /// Load configuration from environment variables.
    ///
    /// - `RASTER_IO_THREADS`: worker count, or `ALL_CPUS`
    /// - `RASTER_IO_CACHE_MB`: decode budget in megabytes
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RASTER_IO_THREADS") {
            if val.eq_ignore_ascii_case("all_cpus") {
                config.threads = None;
            } else if let Ok(threads) = val.parse() {
                config.threads = Some(threads);
            }
        }

        if let Ok(val) = std::env::var("RASTER_IO_CACHE_MB") {
            if let Ok(size) = val.parse() {
                config.cache_mb = size;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.threads == Some(0) {
            return Err("threads must be > 0".to_string());
        }
        if self.cache_mb == 0 {
            return Err("cache_mb must be > 0".to_string());
        }
        Ok(())
    }

    pub fn cache_bytes(&self) -> usize {
        self.cache_mb * 1024 * 1024
    }

    /// Worker count to use, resolving `None` to the number of cores.
    pub fn effective_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    /// Build a rayon pool of at most `limit` workers (and never more than
    /// [`effective_threads`](Self::effective_threads)).
    pub fn thread_pool(&self, limit: Option<usize>) -> Result<rayon::ThreadPool> {
        let threads = limit.map_or(self.effective_threads(), |l| l.min(self.effective_threads()));
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| GridProcessorError::ConfigError(e.to_string()))
    }
}

/// Compression codec for raster stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RasterCompression {
    /// No compression.
    None,
    /// zlib/deflate.
    #[default]
    Deflate,
    /// LZ4 compression.
    Lz4,
    /// Zstd compression.
    Zstd,
}

impl RasterCompression {
    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Deflate => "DEFLATE",
            Self::Lz4 => "LZ4",
            Self::Zstd => "ZSTD",
        }
    }
}

impl FromStr for RasterCompression {
    type Err = GridProcessorError;

    /// Case-insensitive; `ZLIB` is accepted as an alias of `DEFLATE`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "DEFLATE" | "ZLIB" => Ok(Self::Deflate),
            "LZ4" => Ok(Self::Lz4),
            "ZSTD" => Ok(Self::Zstd),
            other => Err(GridProcessorError::ConfigError(format!(
                "unknown compression: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RasterCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a raster store is laid out on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterWriteOptions {
    pub compression: RasterCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Square chunk edge in pixels.
    pub tile_size: usize,

    /// Reduction factors of the overview levels, e.g. `[2, 4, 8, 16]`.
    pub overview_factors: Vec<u32>,
}

impl Default for RasterWriteOptions {
    fn default() -> Self {
        Self {
            compression: RasterCompression::Deflate,
            compression_level: 6,
            tile_size: 512,
            overview_factors: vec![2, 4, 8, 16],
        }
    }
}

impl RasterWriteOptions {
    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(GridProcessorError::ConfigError("tile_size must be > 0".to_string()));
        }
        if self.compression_level == 0 || self.compression_level > 9 {
            return Err(GridProcessorError::ConfigError(
                "compression_level must be 1-9".to_string(),
            ));
        }
        if self.overview_factors.iter().any(|f| *f < 2) {
            return Err(GridProcessorError::ConfigError(
                "overview factors must be >= 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Overview factors sorted ascending without duplicates.
    pub fn sorted_factors(&self) -> Vec<u32> {
        let mut factors = self.overview_factors.clone();
        factors.sort_unstable();
        factors.dedup();
        factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RasterIoConfig::default();
        assert_eq!(config.threads, None);
        assert_eq!(config.cache_mb, 512);
        assert_eq!(config.cache_bytes(), 512 * 1024 * 1024);
        assert!(config.effective_threads() >= 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = RasterIoConfig::default();
        assert!(config.validate().is_ok());

        config.threads = Some(0);
        assert!(config.validate().is_err());

        config = RasterIoConfig::default();
        config.cache_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thread_pool_respects_limit() {
        let config = RasterIoConfig {
            threads: Some(4),
            cache_mb: 64,
        };
        assert_eq!(config.thread_pool(Some(2)).unwrap().current_num_threads(), 2);
        assert_eq!(config.thread_pool(Some(16)).unwrap().current_num_threads(), 4);
        assert_eq!(config.thread_pool(None).unwrap().current_num_threads(), 4);
    }

    #[test]
    fn test_compression_from_str() {
        assert_eq!("none".parse::<RasterCompression>().unwrap(), RasterCompression::None);
        assert_eq!("DEFLATE".parse::<RasterCompression>().unwrap(), RasterCompression::Deflate);
        assert_eq!("zlib".parse::<RasterCompression>().unwrap(), RasterCompression::Deflate);
        assert_eq!("Lz4".parse::<RasterCompression>().unwrap(), RasterCompression::Lz4);
        assert_eq!("zstd".parse::<RasterCompression>().unwrap(), RasterCompression::Zstd);
        assert!("jpeg".parse::<RasterCompression>().is_err());
        assert_eq!(RasterCompression::Zstd.to_string(), "ZSTD");
    }

    #[test]
    fn test_write_options() {
        let mut options = RasterWriteOptions {
            overview_factors: vec![8, 2, 4, 2],
            ..Default::default()
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.sorted_factors(), vec![2, 4, 8]);

        options.overview_factors = vec![1];
        assert!(options.validate().is_err());

        options = RasterWriteOptions {
            tile_size: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
