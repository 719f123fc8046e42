//! Slicing colorized rasters into published XYZ tile trees.
//!
//! ```text
//! colored raster ─► check_srs ─► (repair_srs) ─► generate_tiles ─► scratch/{z}/{x}/{y}.png
//!                                                                       │
//!                              tiles/{variable}/{run}/{hour} ◄─organize─┘
//! ```

pub mod organize;
pub mod srs;
pub mod tiler;

pub use organize::{organize, publish_tree, PublishLocks};
pub use srs::{check_srs, repair_srs, SrsStatus};
pub use tiler::{generate_tiles, TileOptions, TileStats, TILE_SIZE};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// A directory whose name is a zoom level.
pub(crate) fn is_zoom_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Recursively copy `from` into `to`, merging with existing content.
pub(crate) fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Number of PNG tiles under each zoom directory of a tile tree.
pub fn tile_stats(dir: &Path) -> std::io::Result<BTreeMap<u32, usize>> {
    let mut stats = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_zoom_dir(&path) {
            continue;
        }
        let Some(z) = path.file_name().and_then(|n| n.to_str()).and_then(|n| n.parse().ok()) else {
            continue;
        };
        let count = WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "png")
            })
            .count();
        stats.insert(z, count);
    }
    Ok(stats)
}
