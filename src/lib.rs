//! Treewatch
//!
//! Recursive filesystem change notification: watch directory trees, follow
//! subdirectories as they appear, and dispatch create, write, remove, rename
//! and permission-change events to typed callbacks.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod observability;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result, WatchError};
pub use watcher::{Callbacks, Op, StopReason, WatchContext, WatchHandle, WatchSession};

// Callback signatures take the raw event.
pub use notify::Event;
pub use tokio_util::sync::CancellationToken;
