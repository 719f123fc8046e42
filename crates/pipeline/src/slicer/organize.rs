//! Publishing generated tile trees into the shared tiles directory.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use grid_processor::replace_dir;

use super::{copy_tree, is_zoom_dir};
use crate::error::TilingError;
use crate::naming::FileNameInfo;

static GLOBAL_LOCKS: Lazy<PublishLocks> = Lazy::new(PublishLocks::default);

/// One mutex per published directory, so two publishes of the same
/// `(variable, run, hour)` never interleave.
///
/// Entries live only while a publish holds or waits on them.
#[derive(Debug, Default)]
pub struct PublishLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PublishLocks {
    /// Process-wide lock table.
    pub fn global() -> &'static PublishLocks {
        &GLOBAL_LOCKS
    }

    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.entry(lock_key(path))
    }

    /// Run `f` holding the lock for `path`.
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let key = lock_key(path);
        let lock = self.entry(key.clone());
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };
        drop(lock);
        self.prune(&key);
        result
    }

    fn entry(&self, key: PathBuf) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key).or_default().clone()
    }

    fn prune(&self, key: &Path) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only made under the table lock, so a count of one
        // means no publish holds or waits on this entry.
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

/// `path` made absolute with its parent canonicalized, so every spelling
/// of one directory maps to the same key. The parent must exist to be
/// resolved; otherwise the absolute path is used as is.
fn lock_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| absolute.clone()),
        _ => absolute,
    }
}

fn move_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Different filesystem
    copy_tree(from, to)?;
    fs::remove_dir_all(from)
}

fn organize_error(context: &str, path: &Path, e: impl std::fmt::Display) -> TilingError {
    TilingError::Organize(format!("{} {}: {}", context, path.display(), e))
}

/// Move the zoom directories of `scratch` into `final_dir`, replacing any
/// earlier publish, then remove `scratch`.
///
/// Zoom directories are gathered in a staging directory next to
/// `final_dir` and swapped in with one rename, so readers never see a mix
/// of old and new tiles.
pub fn publish_tree(scratch: &Path, final_dir: &Path) -> Result<(), TilingError> {
    let parent = final_dir
        .parent()
        .ok_or_else(|| TilingError::Organize(format!("{} has no parent", final_dir.display())))?;
    fs::create_dir_all(parent).map_err(|e| organize_error("creating", parent, e))?;

    PublishLocks::global().with_lock(final_dir, || publish_locked(scratch, final_dir, parent))
}

fn publish_locked(scratch: &Path, final_dir: &Path, parent: &Path) -> Result<(), TilingError> {
    let staging = parent.join(format!(".staging-{}", uuid::Uuid::new_v4().simple()));
    fs::create_dir(&staging).map_err(|e| organize_error("creating", &staging, e))?;

    let result = stage_zoom_dirs(scratch, &staging).and_then(|moved| {
        replace_dir(&staging, final_dir).map_err(|e| organize_error("publishing", final_dir, e))?;
        Ok(moved)
    });

    let moved = match result {
        Ok(moved) => moved,
        Err(e) => {
            if staging.exists() {
                let _ = fs::remove_dir_all(&staging);
            }
            return Err(e);
        }
    };

    if let Err(e) = fs::remove_dir_all(scratch) {
        warn!(scratch = %scratch.display(), error = %e, "Failed to remove tile scratch directory");
    }

    info!(target_dir = %final_dir.display(), zooms = moved, "Published tiles");
    Ok(())
}

fn stage_zoom_dirs(scratch: &Path, staging: &Path) -> Result<usize, TilingError> {
    let entries = fs::read_dir(scratch).map_err(|e| organize_error("reading", scratch, e))?;
    let mut moved = 0;
    for entry in entries {
        let entry = entry.map_err(|e| organize_error("reading", scratch, e))?;
        let path = entry.path();
        if !is_zoom_dir(&path) {
            debug!(path = %path.display(), "Skipping non-zoom entry");
            continue;
        }
        let dest = staging.join(entry.file_name());
        move_dir(&path, &dest).map_err(|e| organize_error("moving", &path, e))?;
        moved += 1;
    }
    Ok(moved)
}

/// Publish a scratch tile tree under `{variable}/{date}T{cycle}/{forecast}`
/// in `tiles_root`. Returns the published directory.
pub fn organize(scratch: &Path, tiles_root: &Path, info: &FileNameInfo) -> Result<PathBuf, TilingError> {
    let final_dir = info.tile_dir(tiles_root);
    publish_tree(scratch, &final_dir)?;
    Ok(final_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_tree(root: &Path, zooms: &[u32], marker: &str) -> PathBuf {
        let scratch = root.join(format!("scratch-{}", marker));
        for z in zooms {
            let dir = scratch.join(z.to_string()).join("0");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("0.png"), marker).unwrap();
        }
        fs::write(scratch.join("stray.txt"), "x").unwrap();
        fs::create_dir_all(scratch.join("not-a-zoom")).unwrap();
        scratch
    }

    #[test]
    fn test_lock_for_same_key_is_shared() {
        let locks = PublishLocks::default();
        let a = locks.lock_for(Path::new("/tiles/t2m/20260110T19z/06"));
        let b = locks.lock_for(Path::new("/tiles/t2m/20260110T19z/06"));
        let c = locks.lock_for(Path::new("/tiles/t2m/20260110T19z/07"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_spellings_of_one_dir_share_a_lock() {
        // Inside the working directory so it also has a relative spelling
        let root = tempfile::tempdir_in(".").unwrap();
        fs::create_dir_all(root.path().join("tiles/t2m/sub")).unwrap();
        let absolute = fs::canonicalize(root.path()).unwrap().join("tiles/t2m/06");
        let dotted = root.path().join("tiles/t2m/sub/../06");
        let relative = Path::new(".")
            .join(root.path().file_name().unwrap())
            .join("tiles/t2m/06");

        let locks = PublishLocks::default();
        let a = locks.lock_for(&absolute);
        assert!(Arc::ptr_eq(&a, &locks.lock_for(&dotted)));
        assert!(Arc::ptr_eq(&a, &locks.lock_for(&relative)));
        assert_eq!(locks.tracked(), 1);
    }

    #[test]
    fn test_locks_are_dropped_after_use() {
        let locks = PublishLocks::default();
        let key = Path::new("/tiles/t2m/20260110T19z/06");

        let held = locks.with_lock(key, || locks.tracked());
        assert_eq!(held, 1);
        assert_eq!(locks.tracked(), 0);

        // A waiter keeps the entry alive
        let waiter = locks.lock_for(key);
        locks.with_lock(key, || ());
        assert_eq!(locks.tracked(), 1);
        drop(waiter);
    }

    #[test]
    fn test_organize_layout() {
        let root = tempfile::tempdir().unwrap();
        let tiles = root.path().join("tiles");
        let scratch = scratch_tree(root.path(), &[0, 1], "first");
        let info = FileNameInfo::parse("temperature_2m_hrrr.20260110.t19z.f06_colored").unwrap();

        let published = organize(&scratch, &tiles, &info).unwrap();
        assert_eq!(published, tiles.join("temperature_2m/20260110T19z/06"));
        assert!(published.join("0/0/0.png").exists());
        assert!(published.join("1/0/0.png").exists());
        assert!(!published.join("stray.txt").exists());
        assert!(!published.join("not-a-zoom").exists());
        assert!(!scratch.exists());
    }

    #[test]
    fn test_republish_replaces_previous_tiles() {
        let root = tempfile::tempdir().unwrap();
        let final_dir = root.path().join("tiles/t2m/20260110T19z/06");

        publish_tree(&scratch_tree(root.path(), &[0, 1, 2], "old"), &final_dir).unwrap();
        publish_tree(&scratch_tree(root.path(), &[0], "new"), &final_dir).unwrap();

        assert_eq!(fs::read_to_string(final_dir.join("0/0/0.png")).unwrap(), "new");
        assert!(!final_dir.join("2").exists());

        let leftovers: Vec<_> = fs::read_dir(final_dir.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["06".to_string()]);
    }

    #[test]
    fn test_concurrent_publishes_of_same_key() {
        let root = tempfile::tempdir().unwrap();
        let final_dir = root.path().join("tiles/t2m/20260110T19z/06");
        let scratches: Vec<PathBuf> = (0..4)
            .map(|i| scratch_tree(root.path(), &[0, 1], &format!("run{}", i)))
            .collect();

        std::thread::scope(|s| {
            for scratch in &scratches {
                let final_dir = &final_dir;
                s.spawn(move || publish_tree(scratch, final_dir).unwrap());
            }
        });

        // Whole tree comes from one publish
        let z0 = fs::read_to_string(final_dir.join("0/0/0.png")).unwrap();
        let z1 = fs::read_to_string(final_dir.join("1/0/0.png")).unwrap();
        assert_eq!(z0, z1);
    }
}
