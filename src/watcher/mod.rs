//! Recursive directory watching.
//!
//! This module provides:
//! - Directory registration with a notify-rs backed notification source
//! - Classification of raw events into five operation kinds
//! - Watch sessions that dispatch events to typed callbacks

mod callbacks;
mod dispatcher;
mod events;
mod registrar;
mod session;
mod source;

pub use callbacks::{Callbacks, ErrorFn, EventFn, WatchContext};
pub use dispatcher::{EventDispatcher, WatchStats, WatchStatsSnapshot};
pub use events::{EventRecord, Op};
pub use registrar::{PathRegistrar, RegisteredDirs};
pub use session::{
    SessionState, StopReason, WatchHandle, WatchSession, WatcherConfig, DEFAULT_CHANNEL_CAPACITY,
};
pub use source::{EventReceiver, NotificationSource, NotifyBackend, RawEvent};
