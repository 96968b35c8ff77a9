//! Filesystem watch service backed by `notify`.
//!
//! `notify` delivers events on its own thread; they are pushed into a crossbeam channel and
//! only translated into [`WatchMessage`]s when [`WatchService::poll`] is called from the
//! engine's thread.

// -- std imports
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

// -- crate imports
use crossbeam_channel::{self, Receiver};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use tracing::{debug, warn};

// -- module imports
use crate::{
    error::WatchError,
    monitor::{MonitorEvent, WatchId, WatchKind, WatchMessage, WatchService, watch_matches},
};

#[derive(Debug)]
struct Registration {
    path: PathBuf,
    kind: WatchKind,
    os_path: PathBuf,
}

/// Production [`WatchService`].
///
/// File registrations watch their parent directory, so files that do not exist yet are
/// noticed once they appear. OS-level watches are shared and reference counted per directory.
pub struct NotifyWatchService {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    next_id: u64,
    registrations: HashMap<WatchId, Registration>,
    os_watches: HashMap<PathBuf, usize>,
}

impl NotifyWatchService {
    /// Starts the platform watcher.
    ///
    /// # Errors
    /// - [`WatchError::Init`] if the platform watcher cannot be created.
    pub fn new() -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(WatchError::Init)?;

        Ok(Self {
            watcher,
            rx,
            next_id: 0,
            registrations: HashMap::new(),
            os_watches: HashMap::new(),
        })
    }

    fn route(&self, path: &Path, event: MonitorEvent, out: &mut Vec<WatchMessage>) {
        let mut ids: Vec<WatchId> = self
            .registrations
            .iter()
            .filter(|(_, reg)| watch_matches(reg.kind, &reg.path, path))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();

        out.extend(ids.into_iter().map(|id| WatchMessage {
            id,
            event,
            path: path.to_path_buf(),
        }));
    }
}

/// Translate one `notify` event into `(path, event)` pairs.
fn translate(event: &Event) -> Vec<(PathBuf, MonitorEvent)> {
    let all = |kind: MonitorEvent| -> Vec<(PathBuf, MonitorEvent)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match event.kind {
        EventKind::Create(_) => all(MonitorEvent::Created),
        EventKind::Remove(_) => all(MonitorEvent::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(MonitorEvent::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(MonitorEvent::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), MonitorEvent::Deleted));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), MonitorEvent::Created));
            }
            out
        }
        EventKind::Modify(_) => all(MonitorEvent::Changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

impl WatchService for NotifyWatchService {
    fn add_watch(&mut self, path: &Path, kind: WatchKind) -> Result<WatchId, WatchError> {
        let os_path = match kind {
            WatchKind::File => path.parent().unwrap_or(path).to_path_buf(),
            WatchKind::Directory => path.to_path_buf(),
        };

        let count = self.os_watches.get(&os_path).copied().unwrap_or(0);
        if count == 0 {
            self.watcher
                .watch(&os_path, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: os_path.clone(),
                    source,
                })?;
        }
        self.os_watches.insert(os_path.clone(), count + 1);

        self.next_id += 1;
        let id = WatchId(self.next_id);
        self.registrations.insert(
            id,
            Registration {
                path: path.to_path_buf(),
                kind,
                os_path,
            },
        );
        Ok(id)
    }

    fn remove_watch(&mut self, id: WatchId) {
        let Some(reg) = self.registrations.remove(&id) else {
            return;
        };

        let remaining = match self.os_watches.get_mut(&reg.os_path) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => return,
        };

        if remaining == 0 {
            self.os_watches.remove(&reg.os_path);
            if let Err(e) = self.watcher.unwatch(&reg.os_path) {
                debug!(path = %reg.os_path.display(), error = %e, "Could not drop OS watch");
            }
        }
    }

    fn poll(&mut self) -> Vec<WatchMessage> {
        let mut out = Vec::new();
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) => {
                    for (path, kind) in translate(&event) {
                        self.route(&path, kind, &mut out);
                    }
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn test_translate_event_kinds() {
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::File), &["/a"])),
            vec![(PathBuf::from("/a"), MonitorEvent::Created)]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::Any), &["/a"])),
            vec![(PathBuf::from("/a"), MonitorEvent::Deleted)]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/a"]
            )),
            vec![(PathBuf::from("/a"), MonitorEvent::Changed)]
        );
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/a", "/b"]
            )),
            vec![
                (PathBuf::from("/a"), MonitorEvent::Deleted),
                (PathBuf::from("/b"), MonitorEvent::Created),
            ]
        );
        assert!(translate(&event(EventKind::Any, &["/a"])).is_empty());
    }

    #[test]
    fn test_registrations_share_os_watches() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = NotifyWatchService::new().unwrap();

        let file = service
            .add_watch(&dir.path().join("x.menu"), WatchKind::File)
            .unwrap();
        let whole = service.add_watch(dir.path(), WatchKind::Directory).unwrap();
        assert_eq!(service.os_watches.get(dir.path()), Some(&2));

        service.remove_watch(file);
        assert_eq!(service.os_watches.get(dir.path()), Some(&1));
        service.remove_watch(whole);
        assert!(service.os_watches.is_empty());
    }
}
