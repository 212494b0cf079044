//! Callback table and the context handed to every callback.

use std::fmt;
use std::sync::Arc;

use notify::Event;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::Op;
use crate::error::WatchError;

/// Callback for one operation kind.
pub type EventFn = Arc<dyn Fn(&WatchContext, &Event) + Send + Sync>;

/// Callback for errors surfaced while watching.
pub type ErrorFn = Arc<dyn Fn(&WatchContext, &WatchError) + Send + Sync>;

/// Context passed to callbacks.
#[derive(Debug, Clone)]
pub struct WatchContext {
    session_id: Uuid,
    cancel: CancellationToken,
}

impl WatchContext {
    pub(crate) const fn new(session_id: Uuid, cancel: CancellationToken) -> Self {
        Self { session_id, cancel }
    }

    /// Id of the session invoking the callback.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Stop the session after the current callback returns.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The session's cancellation token.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Optional callbacks, one per operation kind plus one for errors.
///
/// Callbacks run inline on the session's task. A slow callback stalls the
/// session, and once the event channel fills the notification source stops
/// draining the OS queue, which may then drop events.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_create: Option<EventFn>,
    on_write: Option<EventFn>,
    on_remove: Option<EventFn>,
    on_rename: Option<EventFn>,
    on_chmod: Option<EventFn>,
    on_error: Option<ErrorFn>,
}

impl Callbacks {
    /// Empty table: every event is dropped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_create(mut self, f: impl Fn(&WatchContext, &Event) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_write(mut self, f: impl Fn(&WatchContext, &Event) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_remove(mut self, f: impl Fn(&WatchContext, &Event) + Send + Sync + 'static) -> Self {
        self.on_remove = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_rename(mut self, f: impl Fn(&WatchContext, &Event) + Send + Sync + 'static) -> Self {
        self.on_rename = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_chmod(mut self, f: impl Fn(&WatchContext, &Event) + Send + Sync + 'static) -> Self {
        self.on_chmod = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(
        mut self,
        f: impl Fn(&WatchContext, &WatchError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the same callback for all five operations.
    #[must_use]
    pub fn on_any(mut self, f: impl Fn(&WatchContext, &Event) + Send + Sync + 'static) -> Self {
        let f: EventFn = Arc::new(f);
        for op in [Op::Create, Op::Write, Op::Remove, Op::Rename, Op::Chmod] {
            *self.slot_mut(op) = Some(Arc::clone(&f));
        }
        self
    }

    /// Replace the callback for `op`.
    pub fn set(&mut self, op: Op, f: Option<EventFn>) {
        *self.slot_mut(op) = f;
    }

    /// Replace the error callback.
    pub fn set_error(&mut self, f: Option<ErrorFn>) {
        self.on_error = f;
    }

    /// Callback registered for `op`, if any.
    #[must_use]
    pub const fn get(&self, op: Op) -> Option<&EventFn> {
        match op {
            Op::Create => self.on_create.as_ref(),
            Op::Write => self.on_write.as_ref(),
            Op::Remove => self.on_remove.as_ref(),
            Op::Rename => self.on_rename.as_ref(),
            Op::Chmod => self.on_chmod.as_ref(),
        }
    }

    /// Hand `err` to the error callback. Returns whether one was set.
    pub fn report(&self, ctx: &WatchContext, err: &WatchError) -> bool {
        match &self.on_error {
            Some(f) => {
                f(ctx, err);
                true
            }
            None => false,
        }
    }

    fn slot_mut(&mut self, op: Op) -> &mut Option<EventFn> {
        match op {
            Op::Create => &mut self.on_create,
            Op::Write => &mut self.on_write,
            Op::Remove => &mut self.on_remove,
            Op::Rename => &mut self.on_rename,
            Op::Chmod => &mut self.on_chmod,
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_create", &self.on_create.is_some())
            .field("on_write", &self.on_write.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .field("on_rename", &self.on_rename.is_some())
            .field("on_chmod", &self.on_chmod.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
