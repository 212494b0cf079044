//! Directory registration.
//!
//! Walks directory trees and registers every directory, never files, with the
//! notification source. Changes to files are reported through the watch on
//! their parent directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use walkdir::WalkDir;

use super::source::NotificationSource;
use crate::error::WatchError;

/// Directories known to a session, keyed by absolute path.
///
/// The flag is `true` while the directory holds an active watch. Only the
/// owning session writes; clones handed out through [`super::WatchHandle`]
/// read snapshots.
#[derive(Debug, Clone, Default)]
pub struct RegisteredDirs {
    inner: Arc<RwLock<BTreeMap<PathBuf, bool>>>,
}

impl RegisteredDirs {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a root that still needs its initial walk.
    pub(crate) fn seed(&self, root: PathBuf) {
        self.inner.write().entry(root).or_insert(false);
    }

    pub(crate) fn mark(&self, path: &Path) {
        self.inner.write().insert(path.to_path_buf(), true);
    }

    /// Mark `path` and everything beneath it as no longer watched.
    ///
    /// Returns how many entries were active before.
    pub(crate) fn mark_gone(&self, path: &Path) -> usize {
        let mut dirs = self.inner.write();
        let mut cleared = 0;
        for (dir, active) in dirs.range_mut(path.to_path_buf()..) {
            if !dir.starts_with(path) {
                break;
            }
            if *active {
                *active = false;
                cleared += 1;
            }
        }
        cleared
    }

    /// Directories without an active watch: roots not yet walked and
    /// directories that have gone away.
    #[must_use]
    pub fn pending(&self) -> Vec<PathBuf> {
        self.inner
            .read()
            .iter()
            .filter(|(_, active)| !**active)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Whether `path` currently holds an active watch.
    #[must_use]
    pub fn is_registered(&self, path: &Path) -> bool {
        self.inner.read().get(path).copied().unwrap_or(false)
    }

    /// Directories that currently hold an active watch, in path order.
    #[must_use]
    pub fn active(&self) -> Vec<PathBuf> {
        self.inner
            .read()
            .iter()
            .filter(|(_, active)| **active)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Full snapshot of the map.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<PathBuf, bool> {
        self.inner.read().clone()
    }

    /// Number of known directories, watched or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Registers directories with a notification source and records them.
///
/// Owns the source: dropping the registrar releases it.
pub struct PathRegistrar<S: NotificationSource> {
    source: S,
    dirs: RegisteredDirs,
    recursive: bool,
}

impl<S: NotificationSource> PathRegistrar<S> {
    /// Create a registrar over `source`, recording into `dirs`.
    pub fn new(source: S, dirs: RegisteredDirs, recursive: bool) -> Self {
        Self {
            source,
            dirs,
            recursive,
        }
    }

    /// Walk `root` pre-order and register every directory found.
    ///
    /// Entries are visited in file-name order and symlinks are not followed.
    /// The first failure aborts the walk; directories registered before it
    /// keep their watches. When not recursive only `root` itself is
    /// registered. Directories already holding a watch are not watched again.
    ///
    /// Returns the number of directories newly registered.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be read or a directory cannot be
    /// watched.
    pub fn register_tree(&mut self, root: &Path) -> Result<usize, WatchError> {
        let max_depth = if self.recursive { usize::MAX } else { 0 };
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(max_depth)
            .sort_by_file_name();

        let mut registered = 0;
        for entry in walker {
            let entry = entry.map_err(|source| WatchError::Walk {
                path: source
                    .path()
                    .map_or_else(|| root.to_path_buf(), Path::to_path_buf),
                source,
            })?;

            if !entry.file_type().is_dir() || self.dirs.is_registered(entry.path()) {
                continue;
            }

            self.add(entry.path())?;
            registered += 1;
        }

        tracing::debug!(root = %root.display(), registered, "Registered directory tree");
        Ok(registered)
    }

    /// Register a single path if it is a directory.
    ///
    /// Follows symlinks. A path that is not a directory, or a directory that
    /// already holds a watch, is left alone.
    ///
    /// Returns whether a watch was added.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be stat-ed or watched.
    pub fn register_one(&mut self, path: &Path) -> Result<bool, WatchError> {
        let metadata = fs::metadata(path).map_err(|source| WatchError::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        if !metadata.is_dir() || self.dirs.is_registered(path) {
            return Ok(false);
        }

        self.add(path)?;
        Ok(true)
    }

    /// Forget `path` and its descendants after they disappeared.
    pub fn forget(&mut self, path: &Path) -> usize {
        let cleared = self.dirs.mark_gone(path);
        if cleared > 0 {
            tracing::debug!(path = %path.display(), cleared, "Directory no longer watched");
        }
        cleared
    }

    /// Whether newly created directories get registered.
    #[must_use]
    pub const fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// The set this registrar records into.
    #[must_use]
    pub const fn dirs(&self) -> &RegisteredDirs {
        &self.dirs
    }

    /// Release the notification source.
    pub fn release(self) {
        drop(self.source);
    }

    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        self.source
            .watch_dir(path)
            .map_err(|source| WatchError::WatchFailed {
                path: path.to_path_buf(),
                source,
            })?;

        self.dirs.mark(path);
        tracing::trace!(path = %path.display(), "Watching directory");
        Ok(())
    }
}
