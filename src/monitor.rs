//! Abstract change notification.
//!
//! The engine never talks to the operating system's notification facilities directly. It
//! registers watches on a [`WatchHub`], which forwards them to a boxed [`WatchService`] and
//! keeps one handler per registration. Notifications are queued inside the service and only
//! reach the handlers when the owner drains them with [`WatchHub::dispatch_pending`], so every
//! event is handled once, in arrival order, on the thread that owns the engine.
//!
//! [`ManualWatchService`] is a service without any OS backing; tests (and embedders that have
//! their own event source) push events into it with [`ManualWatchService::emit`].

// -- std imports
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

// -- crate imports
use tracing::{debug, warn};

// -- module imports
use crate::error::WatchError;

/// Kind of change reported for a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorEvent {
    Created,
    Changed,
    Deleted,
}

/// What a registration observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// A single file, which may not exist yet.
    File,
    /// The direct children of a directory, and the directory itself.
    Directory,
}

/// Identifier of one registration within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchMessage {
    pub id: WatchId,
    pub event: MonitorEvent,
    pub path: PathBuf,
}

/// A source of change notifications.
pub trait WatchService {
    /// Starts observing `path`.
    ///
    /// # Errors
    /// - [`WatchError`] if the backend refuses the registration.
    fn add_watch(&mut self, path: &Path, kind: WatchKind) -> Result<WatchId, WatchError>;

    /// Stops observing; unknown ids are ignored.
    fn remove_watch(&mut self, id: WatchId);

    /// Returns every notification queued since the last call.
    fn poll(&mut self) -> Vec<WatchMessage>;
}

/// Callback invoked for a notification on one registration.
pub type WatchHandler = Rc<dyn Fn(MonitorEvent, &Path)>;

/// Routes notifications from a [`WatchService`] to per-registration handlers.
pub struct WatchHub {
    service: RefCell<Box<dyn WatchService>>,
    handlers: RefCell<HashMap<WatchId, WatchHandler>>,
}

impl fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHub")
            .field("watches", &self.handlers.borrow().len())
            .finish()
    }
}

impl WatchHub {
    pub fn new(service: Box<dyn WatchService>) -> Rc<Self> {
        Rc::new(Self {
            service: RefCell::new(service),
            handlers: RefCell::new(HashMap::new()),
        })
    }

    /// Registers `handler` for changes of `path`.
    ///
    /// Returns `None` when the service refuses the watch; the failure is logged and the caller
    /// simply goes unnotified.
    pub fn watch(
        self: &Rc<Self>,
        path: &Path,
        kind: WatchKind,
        handler: WatchHandler,
    ) -> Option<WatchGuard> {
        let id = match self.service.borrow_mut().add_watch(path, kind) {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %path.display(), ?kind, error = %e, "Could not watch path");
                return None;
            }
        };
        debug!(path = %path.display(), ?kind, id = id.0, "Watching path");
        self.handlers.borrow_mut().insert(id, handler);

        Some(WatchGuard {
            hub: Rc::downgrade(self),
            id,
            path: path.to_path_buf(),
        })
    }

    fn unwatch(&self, id: WatchId) {
        self.handlers.borrow_mut().remove(&id);
        self.service.borrow_mut().remove_watch(id);
    }

    /// Number of live registrations.
    pub fn watch_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Drains the service and runs the handler of every queued notification.
    ///
    /// Handlers may add or drop watches. A notification whose registration was dropped by an
    /// earlier handler in the same batch is discarded. Returns the number of notifications
    /// delivered.
    pub fn dispatch_pending(&self) -> usize {
        let messages = self.service.borrow_mut().poll();
        let mut delivered = 0;

        for message in messages {
            let handler = self.handlers.borrow().get(&message.id).cloned();
            let Some(handler) = handler else {
                continue;
            };
            debug!(
                path = %message.path.display(),
                event = ?message.event,
                "Dispatching change notification"
            );
            handler(message.event, &message.path);
            delivered += 1;
        }

        delivered
    }
}

/// A live registration; dropping it removes the watch.
pub struct WatchGuard {
    hub: Weak<WatchHub>,
    id: WatchId,
    path: PathBuf,
}

impl WatchGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unwatch(self.id);
        }
    }
}

/// Whether a notification about `changed` concerns a registration on `watched`.
pub fn watch_matches(kind: WatchKind, watched: &Path, changed: &Path) -> bool {
    match kind {
        WatchKind::File => changed == watched,
        WatchKind::Directory => changed == watched || changed.parent() == Some(watched),
    }
}

#[derive(Debug, Default)]
struct ManualState {
    next_id: u64,
    watches: BTreeMap<WatchId, (PathBuf, WatchKind)>,
    queue: Vec<WatchMessage>,
}

/// A [`WatchService`] driven entirely by its owner.
///
/// Clones share state: keep one clone to [`emit`](Self::emit) events while the engine owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct ManualWatchService {
    state: Rc<RefCell<ManualState>>,
}

impl ManualWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `event` for every current registration that covers `path`.
    pub fn emit(&self, path: impl AsRef<Path>, event: MonitorEvent) {
        let path = path.as_ref();
        let mut state = self.state.borrow_mut();
        let matching: Vec<WatchId> = state
            .watches
            .iter()
            .filter(|(_, (watched, kind))| watch_matches(*kind, watched, path))
            .map(|(id, _)| *id)
            .collect();

        for id in matching {
            state.queue.push(WatchMessage {
                id,
                event,
                path: path.to_path_buf(),
            });
        }
    }

    /// Whether `path` currently has a registration of `kind`.
    pub fn is_watched(&self, path: impl AsRef<Path>, kind: WatchKind) -> bool {
        let path = path.as_ref();
        self.state
            .borrow()
            .watches
            .values()
            .any(|(p, k)| p == path && *k == kind)
    }

    /// Every current registration.
    pub fn watched_paths(&self) -> Vec<(PathBuf, WatchKind)> {
        self.state.borrow().watches.values().cloned().collect()
    }
}

impl WatchService for ManualWatchService {
    fn add_watch(&mut self, path: &Path, kind: WatchKind) -> Result<WatchId, WatchError> {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = WatchId(state.next_id);
        state.watches.insert(id, (path.to_path_buf(), kind));
        Ok(id)
    }

    fn remove_watch(&mut self, id: WatchId) {
        self.state.borrow_mut().watches.remove(&id);
    }

    fn poll(&mut self) -> Vec<WatchMessage> {
        std::mem::take(&mut self.state.borrow_mut().queue)
    }
}
