//! Routes classified events to callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use notify::Event;

use super::callbacks::{Callbacks, WatchContext};
use super::events::Op;
use super::registrar::PathRegistrar;
use super::source::NotificationSource;
use crate::error::WatchError;

/// Counters for one session.
#[derive(Debug, Default)]
pub struct WatchStats {
    pub events_received: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub events_dropped: AtomicU64,
    pub source_errors: AtomicU64,
    pub registration_errors: AtomicU64,
    pub dirs_registered: AtomicU64,
}

impl WatchStats {
    /// Create new stats tracker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get snapshot of current stats.
    #[must_use]
    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            registration_errors: self.registration_errors.load(Ordering::Relaxed),
            dirs_registered: self.dirs_registered.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of session stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchStatsSnapshot {
    pub events_received: u64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub source_errors: u64,
    pub registration_errors: u64,
    pub dirs_registered: u64,
}

/// Classifies events and invokes the matching callback.
pub struct EventDispatcher {
    callbacks: Callbacks,
    stats: Arc<WatchStats>,
}

impl EventDispatcher {
    pub fn new(callbacks: Callbacks, stats: Arc<WatchStats>) -> Self {
        Self { callbacks, stats }
    }

    /// Dispatch one event.
    ///
    /// A create first registers any new directory so its contents are
    /// watched before the callback runs; failures there go to the error
    /// callback. A remove or rename of a watched directory clears it from
    /// the registered set. Returns the operation the event classified as.
    pub fn dispatch<S: NotificationSource>(
        &self,
        ctx: &WatchContext,
        registrar: &mut PathRegistrar<S>,
        event: &Event,
    ) -> Option<Op> {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);

        let Some(op) = Op::classify(&event.kind) else {
            tracing::trace!(kind = ?event.kind, paths = ?event.paths, "Unmapped event");
            self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match op {
            Op::Create if registrar.is_recursive() => {
                for path in &event.paths {
                    match registrar.register_one(path) {
                        Ok(true) => {
                            self.stats.dirs_registered.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(path = %path.display(), "Watching new directory");
                        }
                        Ok(false) => {}
                        Err(err) => self.registration_failed(ctx, &err),
                    }
                }
            }
            Op::Remove | Op::Rename => {
                for path in &event.paths {
                    registrar.forget(path);
                }
            }
            _ => {}
        }

        if let Some(callback) = self.callbacks.get(op) {
            tracing::trace!(%op, paths = ?event.paths, "Dispatching event");
            callback(ctx, event);
            self.stats.events_dispatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        }

        Some(op)
    }

    /// Report an error surfaced by the notification source.
    pub fn source_error(&self, ctx: &WatchContext, err: &WatchError) {
        self.stats.source_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "Notification source error");
        self.callbacks.report(ctx, err);
    }

    /// Report an error that ends the session before it runs.
    pub fn fatal_error(&self, ctx: &WatchContext, err: &WatchError) {
        self.stats.registration_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "Initial walk failed");
        self.callbacks.report(ctx, err);
    }

    fn registration_failed(&self, ctx: &WatchContext, err: &WatchError) {
        self.stats.registration_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "Failed to watch new directory");
        self.callbacks.report(ctx, err);
    }
}
