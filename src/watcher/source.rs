//! Notification source backed by notify-rs.
//!
//! A source only knows how to add a watch for one directory. Events and
//! errors travel back over a single bounded channel so the session sees them
//! in the order the source produced them. Releasing a source is dropping it.

use std::path::Path;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;

/// One item delivered by a notification source.
pub type RawEvent = notify::Result<Event>;

/// Receiving half of a notification source's channel.
pub type EventReceiver = mpsc::Receiver<RawEvent>;

/// OS-level change notification facility a session registers directories with.
pub trait NotificationSource: Send + 'static {
    /// Watch a single directory, non-recursively.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the directory cannot be watched.
    fn watch_dir(&mut self, path: &Path) -> notify::Result<()>;
}

/// The platform's recommended notify watcher.
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    /// Open a notify watcher whose events land in a channel of `capacity`.
    ///
    /// The notify thread blocks while the channel is full, so a slow consumer
    /// pushes back on the OS queue instead of growing memory here.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created.
    pub fn open(capacity: usize) -> Result<(Self, EventReceiver), WatchError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let watcher = notify::recommended_watcher(move |result: RawEvent| {
            if tx.blocking_send(result).is_err() {
                tracing::trace!("Session gone, dropping notification");
            }
        })
        .map_err(|e| WatchError::SourceInit {
            reason: e.to_string(),
        })?;

        tracing::debug!(capacity, "Opened notification source");
        Ok((Self { watcher }, rx))
    }
}

impl NotificationSource for NotifyBackend {
    fn watch_dir(&mut self, path: &Path) -> notify::Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)
    }
}

impl Drop for NotifyBackend {
    fn drop(&mut self) {
        tracing::debug!("Released notification source");
    }
}
