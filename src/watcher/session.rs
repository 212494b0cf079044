//! Watch sessions.
//!
//! A session owns one notification source, the set of directories registered
//! with it, and the callbacks. Starting it walks every root, then dispatches
//! events until cancelled or until the source closes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::callbacks::{Callbacks, WatchContext};
use super::dispatcher::{EventDispatcher, WatchStats, WatchStatsSnapshot};
use super::registrar::{PathRegistrar, RegisteredDirs};
use super::source::{EventReceiver, NotificationSource, NotifyBackend};
use crate::error::WatchError;
use crate::observability::session_span;
use crate::{Error, Result};

/// Default capacity of the channel between the source and the session.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Root directories to watch.
    pub watch_dirs: Vec<PathBuf>,
    /// Register subdirectories, including ones created while watching.
    pub recursive: bool,
    /// Capacity of the event channel.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_dirs: Vec::new(),
            recursive: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl WatcherConfig {
    /// Recursive configuration for the given roots.
    pub fn for_dirs<P: AsRef<Path>>(dirs: &[P]) -> Self {
        Self {
            watch_dirs: dirs.iter().map(|d| d.as_ref().to_path_buf()).collect(),
            ..Self::default()
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Roots validated and source open; not started.
    Constructed,
    /// Initial registration of the root trees.
    Walking,
    /// Dispatching events.
    Running,
    /// Finished; the source has been released.
    Stopped,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The cancellation token fired.
    Cancelled,
    /// The notification source closed its channel.
    SourceClosed,
    /// The initial walk failed; the error went to the error callback.
    WalkFailed,
}

/// One watching run over one or more root directories.
pub struct WatchSession<S: NotificationSource = NotifyBackend> {
    id: Uuid,
    roots: Vec<PathBuf>,
    registrar: PathRegistrar<S>,
    events: EventReceiver,
    callbacks: Callbacks,
    cancel: CancellationToken,
    stats: Arc<WatchStats>,
    state: watch::Sender<SessionState>,
}

impl WatchSession<NotifyBackend> {
    /// Watch `root` with no callbacks set.
    ///
    /// Roots are canonicalized, so callbacks and [`WatchSession::roots`]
    /// report symlink-resolved absolute paths rather than the path as given.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist, is not a directory, or the
    /// notification source cannot be opened.
    pub fn new(cancel: CancellationToken, root: impl AsRef<Path>) -> Result<Self> {
        Self::with_callbacks(cancel, root, Callbacks::new())
    }

    /// Watch `root` with the given callbacks.
    ///
    /// # Errors
    ///
    /// See [`WatchSession::new`].
    pub fn with_callbacks(
        cancel: CancellationToken,
        root: impl AsRef<Path>,
        callbacks: Callbacks,
    ) -> Result<Self> {
        Self::from_config(cancel, &WatcherConfig::for_dirs(&[root]), callbacks)
    }

    /// Watch several roots from one session sharing one registered set.
    ///
    /// # Errors
    ///
    /// Returns an error if any root is invalid; nothing is opened in that case.
    pub fn multi<P: AsRef<Path>>(
        cancel: CancellationToken,
        roots: &[P],
        callbacks: Callbacks,
    ) -> Result<Self> {
        Self::from_config(cancel, &WatcherConfig::for_dirs(roots), callbacks)
    }

    /// Build a session from configuration.
    ///
    /// Roots are validated before the notification source is opened.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no roots, any root is invalid, or the
    /// notification source cannot be opened.
    pub fn from_config(
        cancel: CancellationToken,
        config: &WatcherConfig,
        callbacks: Callbacks,
    ) -> Result<Self> {
        let roots = validate_roots(&config.watch_dirs)?;
        let (source, events) = NotifyBackend::open(config.channel_capacity)?;
        Ok(Self::assemble(
            cancel,
            roots,
            config.recursive,
            callbacks,
            source,
            events,
        ))
    }
}

impl<S: NotificationSource> WatchSession<S> {
    /// Build a session over a caller-supplied notification source.
    ///
    /// `config.channel_capacity` is ignored; the caller created `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no roots or any root is invalid. The
    /// source is dropped in that case.
    pub fn with_source(
        cancel: CancellationToken,
        config: &WatcherConfig,
        callbacks: Callbacks,
        source: S,
        events: EventReceiver,
    ) -> Result<Self> {
        let roots = validate_roots(&config.watch_dirs)?;
        Ok(Self::assemble(
            cancel,
            roots,
            config.recursive,
            callbacks,
            source,
            events,
        ))
    }

    fn assemble(
        cancel: CancellationToken,
        roots: Vec<PathBuf>,
        recursive: bool,
        callbacks: Callbacks,
        source: S,
        events: EventReceiver,
    ) -> Self {
        let dirs = RegisteredDirs::new();
        for root in &roots {
            dirs.seed(root.clone());
        }

        let id = Uuid::new_v4();
        let (state, _) = watch::channel(SessionState::Constructed);
        tracing::debug!(%id, roots = roots.len(), recursive, "Watch session constructed");

        Self {
            id,
            roots,
            registrar: PathRegistrar::new(source, dirs, recursive),
            events,
            callbacks,
            cancel,
            stats: WatchStats::new(),
            state,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Canonical root directories.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    #[must_use]
    pub const fn is_recursive(&self) -> bool {
        self.registrar.is_recursive()
    }

    /// Callbacks, replaceable until the session starts.
    pub fn callbacks_mut(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    /// Replace all callbacks.
    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    /// Run the session on the tokio runtime and return immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> WatchHandle {
        let id = self.id;
        let cancel = self.cancel.clone();
        let dirs = self.registrar.dirs().clone();
        let stats = Arc::clone(&self.stats);
        let state = self.state.subscribe();

        let span = session_span(&id, self.roots.len());
        let task = tokio::spawn(self.run().instrument(span));

        WatchHandle {
            id,
            cancel,
            dirs,
            stats,
            state,
            task,
        }
    }

    /// Drive the session on the current task until it stops.
    ///
    /// Callbacks run inline here. The source is released before this returns,
    /// whichever way the session ended.
    pub async fn run(self) -> StopReason {
        let Self {
            id,
            mut registrar,
            mut events,
            callbacks,
            cancel,
            stats,
            state,
            ..
        } = self;

        let ctx = WatchContext::new(id, cancel.clone());
        let dispatcher = EventDispatcher::new(callbacks, Arc::clone(&stats));

        state.send_replace(SessionState::Walking);
        let reason = match walk_pending(&mut registrar) {
            Ok(registered) => {
                stats
                    .dirs_registered
                    .fetch_add(registered as u64, Ordering::Relaxed);
                state.send_replace(SessionState::Running);
                tracing::info!(
                    dirs = registrar.dirs().active().len(),
                    "Watch session running"
                );
                dispatch_loop(&mut registrar, &mut events, &dispatcher, &ctx, &cancel).await
            }
            Err(err) => {
                dispatcher.fatal_error(&ctx, &err);
                StopReason::WalkFailed
            }
        };

        drop(events);
        registrar.release();
        state.send_replace(SessionState::Stopped);
        tracing::info!(?reason, "Watch session stopped");
        reason
    }
}

impl<S: NotificationSource> fmt::Debug for WatchSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSession")
            .field("id", &self.id)
            .field("roots", &self.roots)
            .field("recursive", &self.registrar.is_recursive())
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

/// Walk every root that has not been registered yet.
///
/// A root nested under an earlier root is already registered by that walk
/// and is skipped.
fn walk_pending<S: NotificationSource>(
    registrar: &mut PathRegistrar<S>,
) -> std::result::Result<usize, WatchError> {
    let mut registered = 0;
    for root in registrar.dirs().pending() {
        if registrar.dirs().is_registered(&root) {
            continue;
        }
        registered += registrar.register_tree(&root)?;
    }
    Ok(registered)
}

async fn dispatch_loop<S: NotificationSource>(
    registrar: &mut PathRegistrar<S>,
    events: &mut EventReceiver,
    dispatcher: &EventDispatcher,
    ctx: &WatchContext,
    cancel: &CancellationToken,
) -> StopReason {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return StopReason::Cancelled,

            received = events.recv() => match received {
                Some(Ok(event)) => {
                    dispatcher.dispatch(ctx, registrar, &event);
                }
                Some(Err(err)) => {
                    dispatcher.source_error(ctx, &WatchError::Source(err));
                }
                None => return StopReason::SourceClosed,
            },
        }
    }
}

/// Check every root exists and is a directory, returning canonical paths.
fn validate_roots(dirs: &[PathBuf]) -> std::result::Result<Vec<PathBuf>, WatchError> {
    if dirs.is_empty() {
        return Err(WatchError::NoRoots);
    }

    let mut roots = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let canonical = fs::canonicalize(dir).map_err(|source| WatchError::InvalidPath {
            path: dir.clone(),
            source,
        })?;

        let metadata = fs::metadata(&canonical).map_err(|source| WatchError::InvalidPath {
            path: dir.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(WatchError::NotADirectory { path: dir.clone() });
        }

        if !roots.contains(&canonical) {
            roots.push(canonical);
        }
    }
    Ok(roots)
}

/// Handle to a started session.
pub struct WatchHandle {
    id: Uuid,
    cancel: CancellationToken,
    dirs: RegisteredDirs,
    stats: Arc<WatchStats>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<StopReason>,
}

impl WatchHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the session to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target` or a later state.
    ///
    /// Returns the state actually observed, so waiting for
    /// [`SessionState::Running`] yields [`SessionState::Stopped`] when the
    /// initial walk failed.
    pub async fn wait_for_state(&self, target: SessionState) -> SessionState {
        let mut state = self.state.clone();
        let observed = state.wait_for(|s| *s >= target).await.map(|s| *s).ok();
        observed.unwrap_or_else(|| *state.borrow())
    }

    /// Directories currently holding a watch.
    #[must_use]
    pub fn registered_dirs(&self) -> Vec<PathBuf> {
        self.dirs.active()
    }

    #[must_use]
    pub fn is_registered(&self, path: &Path) -> bool {
        self.dirs.is_registered(path)
    }

    #[must_use]
    pub fn stats(&self) -> WatchStatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the session task panicked or was aborted.
    pub async fn wait(self) -> Result<StopReason> {
        self.task
            .await
            .map_err(|e| Error::internal(format!("watch session task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::source::mock::MockSource;
    use crate::watcher::source::RawEvent;
    use notify::event::{CreateKind, DataChange, ModifyKind};
    use notify::{Event, EventKind};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const BOUND: Duration = Duration::from_secs(5);

    fn root() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = fs::canonicalize(tmp.path()).unwrap();
        (tmp, path)
    }

    fn mock_session(
        root: &Path,
        callbacks: Callbacks,
    ) -> (
        WatchSession<MockSource>,
        mpsc::Sender<RawEvent>,
        crate::watcher::source::mock::MockProbe,
        CancellationToken,
    ) {
        let source = MockSource::new();
        let probe = source.probe();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let session = WatchSession::with_source(
            cancel.clone(),
            &WatcherConfig::for_dirs(&[root]),
            callbacks,
            source,
            rx,
        )
        .unwrap();
        (session, tx, probe, cancel)
    }

    fn write_event(path: PathBuf) -> RawEvent {
        Ok(Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(path))
    }

    #[test]
    fn test_validate_roots() {
        let (_tmp, path) = root();
        fs::write(path.join("file.txt"), "x").unwrap();

        assert!(matches!(validate_roots(&[]), Err(WatchError::NoRoots)));
        assert!(matches!(
            validate_roots(&[path.join("file.txt")]),
            Err(WatchError::NotADirectory { .. })
        ));
        assert!(matches!(
            validate_roots(&[path.join("missing")]),
            Err(WatchError::InvalidPath { .. })
        ));
        assert_eq!(
            validate_roots(&[path.clone(), path.clone()]).unwrap(),
            vec![path]
        );
    }

    #[test]
    fn test_debug_shows_roots() {
        let (_tmp, path) = root();
        let (session, _tx, _probe, _cancel) = mock_session(&path, Callbacks::new());
        let debug = format!("{session:?}");
        assert!(debug.contains("WatchSession"));
        assert!(debug.contains("recursive: true"));
        assert!(debug.contains(&format!("{}", session.id())));
    }

    #[test]
    fn test_invalid_root_releases_supplied_source() {
        let (_tmp, path) = root();
        let source = MockSource::new();
        let probe = source.probe();
        let (_tx, rx) = mpsc::channel(1);

        let result = WatchSession::with_source(
            CancellationToken::new(),
            &WatcherConfig::for_dirs(&[path.join("missing")]),
            Callbacks::new(),
            source,
            rx,
        );

        assert!(result.is_err());
        assert_eq!(probe.released(), 1);
        assert!(probe.watched().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_and_releases_once() {
        let (_tmp, path) = root();
        let (session, _tx, probe, cancel) = mock_session(&path, Callbacks::new());

        let handle = session.start();
        assert_eq!(
            handle.wait_for_state(SessionState::Running).await,
            SessionState::Running
        );
        assert!(handle.is_registered(&path));

        cancel.cancel();
        let reason = tokio::time::timeout(BOUND, handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(probe.released(), 1);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_pending_events() {
        let (_tmp, path) = root();
        let (session, tx, probe, cancel) = mock_session(&path, Callbacks::new());

        for _ in 0..8 {
            tx.send(write_event(path.join("f"))).await.unwrap();
            tx.send(Err(notify::Error::generic("overflow"))).await.unwrap();
        }
        cancel.cancel();

        let reason = tokio::time::timeout(BOUND, session.run()).await.unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(probe.released(), 1);
    }

    #[tokio::test]
    async fn test_source_closed_stops_session() {
        let (_tmp, path) = root();
        let (session, tx, probe, _cancel) = mock_session(&path, Callbacks::new());
        drop(tx);

        let reason = tokio::time::timeout(BOUND, session.run()).await.unwrap();
        assert_eq!(reason, StopReason::SourceClosed);
        assert_eq!(probe.released(), 1);
    }

    #[tokio::test]
    async fn test_walk_failure_reports_and_stops() {
        let (_tmp, path) = root();
        fs::create_dir(path.join("locked")).unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let callbacks = Callbacks::new().on_error(move |_, err| {
            sink.lock().push(err.path().map(Path::to_path_buf));
        });
        let (session, _tx, probe, _cancel) = mock_session(&path, callbacks);
        probe.fail_on(path.join("locked"));

        let handle = session.start();
        assert_eq!(
            handle.wait_for_state(SessionState::Running).await,
            SessionState::Stopped
        );
        let reason = handle.wait().await.unwrap();

        assert_eq!(reason, StopReason::WalkFailed);
        assert_eq!(*errors.lock(), vec![Some(path.join("locked"))]);
        assert_eq!(probe.released(), 1);
    }

    #[tokio::test]
    async fn test_source_error_does_not_stop_session() {
        let (_tmp, path) = root();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::clone(&seen);
        let writes = Arc::clone(&seen);
        let callbacks = Callbacks::new()
            .on_error(move |_, err| errors.lock().push(format!("error: {err}")))
            .on_write(move |ctx, event| {
                writes
                    .lock()
                    .push(format!("write: {}", event.paths[0].display()));
                ctx.cancel();
            });
        let (session, tx, probe, _cancel) = mock_session(&path, callbacks);

        tx.send(Err(notify::Error::generic("queue overflow")))
            .await
            .unwrap();
        tx.send(write_event(path.join("after.txt"))).await.unwrap();

        let reason = tokio::time::timeout(BOUND, session.run()).await.unwrap();

        assert_eq!(reason, StopReason::Cancelled);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("queue overflow"));
        assert_eq!(seen[1], format!("write: {}", path.join("after.txt").display()));
        assert_eq!(probe.released(), 1);
    }

    #[tokio::test]
    async fn test_created_directory_becomes_watched() {
        let (_tmp, path) = root();
        let sub = path.join("sub");
        let created = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&created);
        let callbacks = Callbacks::new().on_create(move |ctx, event| {
            sink.lock().extend(event.paths.iter().cloned());
            ctx.cancel();
        });
        let (mut session, tx, probe, _cancel) = mock_session(&path, Callbacks::new());
        session.set_callbacks(callbacks);

        let handle = session.start();
        assert_eq!(
            handle.wait_for_state(SessionState::Running).await,
            SessionState::Running
        );
        assert_eq!(probe.watched(), vec![path.clone()]);
        assert!(!handle.is_registered(&sub));

        fs::create_dir(&sub).unwrap();
        tx.send(Ok(Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub.clone())))
            .await
            .unwrap();

        let stats = Arc::clone(&handle.stats);
        let dirs = handle.dirs.clone();
        let reason = tokio::time::timeout(BOUND, handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(*created.lock(), vec![sub.clone()]);
        assert_eq!(probe.watched(), vec![path, sub.clone()]);
        assert!(dirs.is_registered(&sub));
        assert_eq!(stats.snapshot().dirs_registered, 2);
    }

    #[tokio::test]
    async fn test_nested_roots_are_walked_once() {
        let (_tmp, path) = root();
        let sub = path.join("sub");
        fs::create_dir_all(sub.join("deep")).unwrap();

        let source = MockSource::new();
        let probe = source.probe();
        let (_tx, rx) = mpsc::channel(1);
        let session = WatchSession::with_source(
            CancellationToken::new(),
            &WatcherConfig::for_dirs(&[&sub, &path]),
            Callbacks::new(),
            source,
            rx,
        )
        .unwrap();

        let handle = session.start();
        handle.wait_for_state(SessionState::Running).await;

        assert_eq!(
            probe.watched(),
            vec![path.clone(), sub.clone(), sub.join("deep")]
        );
        assert_eq!(handle.stats().dirs_registered, 3);

        handle.cancel();
        assert_eq!(handle.wait().await.unwrap(), StopReason::Cancelled);
    }

    #[tokio::test]
    async fn test_multi_root_session_walks_every_root() {
        let (_a, root_a) = root();
        let (_b, root_b) = root();
        fs::create_dir(root_b.join("nested")).unwrap();

        let source = MockSource::new();
        let probe = source.probe();
        let (_tx, rx) = mpsc::channel(1);
        let session = WatchSession::with_source(
            CancellationToken::new(),
            &WatcherConfig::for_dirs(&[&root_a, &root_b]),
            Callbacks::new(),
            source,
            rx,
        )
        .unwrap();
        assert_eq!(session.roots().len(), 2);

        let handle = session.start();
        handle.wait_for_state(SessionState::Running).await;

        assert!(handle.is_registered(&root_a));
        assert!(handle.is_registered(&root_b.join("nested")));
        assert!(probe.is_watched(&root_b.join("nested")));

        handle.cancel();
        assert_eq!(handle.wait().await.unwrap(), StopReason::Cancelled);
    }

    #[tokio::test]
    async fn test_callbacks_see_session_id() {
        let (_tmp, path) = root();
        let ids = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ids);
        let callbacks = Callbacks::new().on_any(move |ctx, _| {
            sink.lock().push(ctx.session_id());
            ctx.cancel();
        });
        let (session, tx, _probe, _cancel) = mock_session(&path, callbacks);
        let id = session.id();

        tx.send(write_event(path.join("f"))).await.unwrap();
        session.run().await;

        assert_eq!(*ids.lock(), vec![id]);
    }
}
