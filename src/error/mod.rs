//! Error types and Result aliases for treewatch.
//!
//! Construction failures are returned synchronously as [`Error`]. Once a
//! session is running, failures only reach the caller as a [`WatchError`]
//! handed to the session's error callback.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using treewatch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for treewatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Watch session error.
    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while constructing or running a watch session.
#[derive(Error, Debug)]
pub enum WatchError {
    /// No root directories were supplied.
    #[error("no root directories to watch")]
    NoRoots,

    /// Root path could not be resolved.
    #[error("invalid path '{}': {source}", path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path exists but is not a directory.
    #[error("path is not a directory: '{}'", path.display())]
    NotADirectory { path: PathBuf },

    /// The notification source could not be opened.
    #[error("failed to open notification source: {reason}")]
    SourceInit { reason: String },

    /// Walking a directory tree failed.
    #[error("failed to walk '{}': {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Stat of a newly observed path failed.
    #[error("failed to stat '{}': {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The notification source refused to watch a directory.
    #[error("failed to watch path '{}': {source}", path.display())]
    WatchFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Error reported by the notification source while running.
    #[error("notification source error: {0}")]
    Source(#[from] notify::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl WatchError {
    /// Path the failure refers to, if it is tied to one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InvalidPath { path, .. }
            | Self::NotADirectory { path }
            | Self::Walk { path, .. }
            | Self::Stat { path, .. }
            | Self::WatchFailed { path, .. } => Some(path),
            Self::Source(err) => err.paths.first().map(PathBuf::as_path),
            Self::NoRoots | Self::SourceInit { .. } => None,
        }
    }
}
