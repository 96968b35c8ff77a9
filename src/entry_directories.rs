//! Shadow tree of desktop entry directories.
//!
//! Every directory an [`EntryDirectory`] points at is mirrored once in a tree of cached nodes
//! keyed by canonical path, no matter how many menus reference it. A node is scanned at most
//! once; afterwards it only changes through directory notifications, which add, reload, or
//! drop single entries and subtrees. Nodes marked deleted stay alive until the last handle
//! referencing them goes away.
//!
//! [`EntryCache::all_desktops`] keeps a single-slot memo of the application pool visible
//! through one [`EntryDirectoryList`].

// -- std imports
use std::{
    cell::{Cell, RefCell},
    fmt, fs,
    path::{Component, Path},
    rc::{Rc, Weak},
};

// -- crate imports
use tracing::{debug, trace};

// -- module imports
use crate::{
    desktop_entries::{DesktopEntry, DesktopEntrySet, EntryKind, EntryLoader},
    monitor::{MonitorEvent, WatchGuard, WatchHub, WatchKind},
};

/// Callback run when anything below a monitored directory changes.
pub type DirectoryCallback = Rc<dyn Fn()>;

/// Identifies who registered a directory monitor, for deduplication and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorOwner(pub usize, pub usize);

#[derive(Clone)]
struct DirMonitor {
    directory: u64,
    owner: MonitorOwner,
    callback: DirectoryCallback,
}

type DirNode = Rc<RefCell<CachedDir>>;

struct CachedDir {
    name: String,
    parent: Weak<RefCell<CachedDir>>,
    subdirs: Vec<DirNode>,
    entries: Vec<DesktopEntry>,
    watch: Option<WatchGuard>,
    monitors: Vec<DirMonitor>,
    have_read_entries: bool,
    deleted: bool,
    references: usize,
}

impl CachedDir {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: Weak::new(),
            subdirs: Vec::new(),
            entries: Vec::new(),
            watch: None,
            monitors: Vec::new(),
            have_read_entries: false,
            deleted: false,
            references: 0,
        }
    }

    fn find_subdir(&self, name: &str) -> Option<DirNode> {
        self.subdirs
            .iter()
            .find(|sub| sub.borrow().name == name)
            .cloned()
    }

    fn find_entry(&self, basename: &str) -> Option<DesktopEntry> {
        self.entries
            .iter()
            .find(|entry| entry.basename() == basename)
            .cloned()
    }
}

fn find_relative_path(node: &DirNode, relative_path: &str) -> Option<DesktopEntry> {
    let mut parts: Vec<&str> = relative_path.split('/').collect();
    let basename = parts.pop()?;

    let mut current = Rc::clone(node);
    for part in parts {
        let next = current.borrow().find_subdir(part)?;
        current = next;
    }
    let entry = current.borrow().find_entry(basename);
    entry
}

fn add_reference(node: &DirNode) {
    let mut current = Some(Rc::clone(node));
    while let Some(n) = current {
        let mut dir = n.borrow_mut();
        dir.references += 1;
        current = dir.parent.upgrade();
    }
}

fn remove_reference(node: &DirNode) {
    let mut current = Some(Rc::clone(node));
    while let Some(n) = current {
        let parent = {
            let mut dir = n.borrow_mut();
            dir.references = dir.references.saturating_sub(1);
            dir.parent.upgrade()
        };

        let unlink = {
            let dir = n.borrow();
            dir.references == 0 && dir.deleted
        };
        if unlink {
            if let Some(parent) = &parent {
                parent
                    .borrow_mut()
                    .subdirs
                    .retain(|sub| !Rc::ptr_eq(sub, &n));
            }
            debug!(name = %n.borrow().name, "Freeing deleted cached directory");
        }

        current = parent;
    }
}

fn collect_monitors(node: &DirNode) -> Vec<DirectoryCallback> {
    let mut callbacks = Vec::new();
    let mut current = Some(Rc::clone(node));
    while let Some(n) = current {
        let dir = n.borrow();
        callbacks.extend(dir.monitors.iter().map(|m| Rc::clone(&m.callback)));
        current = dir.parent.upgrade();
    }
    callbacks
}

/// Registry of cached directories plus the all-desktops memo.
pub struct EntryCache {
    root: DirNode,
    loader: EntryLoader,
    hub: Rc<WatchHub>,
    memo: RefCell<Option<(EntryDirectoryList, Rc<DesktopEntrySet>)>>,
    next_directory_id: Cell<u64>,
    self_weak: Weak<EntryCache>,
}

impl fmt::Debug for EntryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCache")
            .field("memoized", &self.memo.borrow().is_some())
            .finish()
    }
}

impl EntryCache {
    pub fn new(hub: Rc<WatchHub>, loader: EntryLoader) -> Rc<Self> {
        Rc::new_cyclic(|self_weak| Self {
            root: Rc::new(RefCell::new(CachedDir::new("/"))),
            loader,
            hub,
            memo: RefCell::new(None),
            next_directory_id: Cell::new(0),
            self_weak: self_weak.clone(),
        })
    }

    pub fn loader(&self) -> &EntryLoader {
        &self.loader
    }

    /// Returns the node for `canonical`, creating missing components on the way.
    fn lookup(&self, canonical: &Path) -> DirNode {
        let mut current = Rc::clone(&self.root);
        for component in canonical.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy();

            let existing = current.borrow().find_subdir(&name);
            let next = match existing {
                Some(sub) => sub,
                None => {
                    let fresh = Rc::new(RefCell::new(CachedDir::new(&name)));
                    fresh.borrow_mut().parent = Rc::downgrade(&current);
                    current.borrow_mut().subdirs.push(Rc::clone(&fresh));
                    fresh
                }
            };
            current = next;
        }
        current
    }

    fn ensure_monitor(&self, node: &DirNode, path: &Path) {
        if node.borrow().watch.is_some() {
            return;
        }

        let cache = self.self_weak.clone();
        let guard = self.hub.watch(
            path,
            WatchKind::Directory,
            Rc::new(move |event, changed| {
                if let Some(cache) = cache.upgrade() {
                    cache.handle_change(event, changed);
                }
            }),
        );
        node.borrow_mut().watch = guard;
    }

    /// Reads `path` into `node` once, recursing into subdirectories.
    ///
    /// Children are visited in name order rather than in the order `read_dir` yields them,
    /// so synthesized legacy menus and flat listings come out the same on every filesystem.
    fn load_entries_recursive(&self, node: &DirNode, path: &Path) -> bool {
        if node.borrow().have_read_entries {
            return true;
        }

        let read = match fs::read_dir(path) {
            Ok(read) => read,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not scan directory");
                return false;
            }
        };

        self.ensure_monitor(node, path);

        let mut names: Vec<String> = read
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        for name in names {
            let child = path.join(&name);
            if EntryKind::from_file_name(&name).is_some() {
                self.add_entry(node, &child);
            } else {
                self.add_subdir(node, &name, &child);
            }
        }

        node.borrow_mut().have_read_entries = true;
        true
    }

    fn add_entry(&self, node: &DirNode, path: &Path) -> bool {
        match self.loader.load(path) {
            Some(entry) => {
                node.borrow_mut().entries.push(entry);
                true
            }
            None => false,
        }
    }

    fn update_entry(&self, node: &DirNode, basename: &str, path: &Path) -> bool {
        let position = node
            .borrow()
            .entries
            .iter()
            .position(|entry| entry.basename() == basename);

        let Some(index) = position else {
            return self.add_entry(node, path);
        };

        let reloaded = node.borrow().entries[index].reload(&self.loader);
        let mut dir = node.borrow_mut();
        match reloaded {
            Some(entry) => dir.entries[index] = entry,
            None => {
                dir.entries.remove(index);
            }
        }
        true
    }

    fn remove_entry(&self, node: &DirNode, basename: &str) -> bool {
        let mut dir = node.borrow_mut();
        match dir.entries.iter().position(|e| e.basename() == basename) {
            Some(index) => {
                dir.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn add_subdir(&self, node: &DirNode, name: &str, path: &Path) -> bool {
        let existing = node.borrow().find_subdir(name);
        if let Some(sub) = existing {
            sub.borrow_mut().deleted = false;
            return true;
        }

        let sub = Rc::new(RefCell::new(CachedDir::new(name)));
        if !self.load_entries_recursive(&sub, path) {
            return false;
        }

        trace!(path = %path.display(), "Caching directory");
        sub.borrow_mut().parent = Rc::downgrade(node);
        node.borrow_mut().subdirs.push(sub);
        true
    }

    fn remove_subdir(&self, node: &DirNode, name: &str) -> bool {
        let Some(sub) = node.borrow().find_subdir(name) else {
            return false;
        };

        let free_now = {
            let mut dir = sub.borrow_mut();
            dir.deleted = true;
            dir.references == 0
        };
        if free_now {
            node.borrow_mut()
                .subdirs
                .retain(|candidate| !Rc::ptr_eq(candidate, &sub));
        }
        true
    }

    /// Applies one directory notification to the shadow tree.
    pub(crate) fn handle_change(&self, event: MonitorEvent, path: &Path) {
        let (Some(dirname), Some(basename)) =
            (path.parent(), path.file_name().and_then(|n| n.to_str()))
        else {
            return;
        };

        debug!(path = %path.display(), ?event, "Entry directory changed");
        let node = self.lookup(dirname);

        let handled = if EntryKind::from_file_name(basename).is_some() {
            match event {
                MonitorEvent::Created | MonitorEvent::Changed => {
                    self.update_entry(&node, basename, path)
                }
                MonitorEvent::Deleted => self.remove_entry(&node, basename),
            }
        } else {
            match event {
                MonitorEvent::Created => self.add_subdir(&node, basename, path),
                MonitorEvent::Changed => false,
                MonitorEvent::Deleted => self.remove_subdir(&node, basename),
            }
        };

        if handled {
            self.empty_desktop_cache();
            for callback in collect_monitors(&node) {
                callback();
            }
        }
    }

    /// Every application entry visible through `list`, later directories losing to earlier
    /// ones on shared ids.
    pub fn all_desktops(&self, list: &EntryDirectoryList) -> Rc<DesktopEntrySet> {
        if let Some((cached_list, set)) = &*self.memo.borrow() {
            if cached_list.same_as(list) {
                return Rc::clone(set);
            }
        }

        let mut set = DesktopEntrySet::new();
        for directory in list.dirs.iter().rev() {
            let legacy = directory.0.is_legacy;
            directory.foreach_recursive(|id, entry| {
                let entry = if legacy && !entry.has_categories() {
                    entry.with_legacy_category(self.loader.categories())
                } else {
                    entry.clone()
                };
                set.add_entry(entry, id);
                true
            });
        }

        let set = Rc::new(set);
        let previous = self.memo.replace(Some((list.clone(), Rc::clone(&set))));
        drop(previous);
        set
    }

    /// Drops the all-desktops memo.
    pub fn empty_desktop_cache(&self) {
        let previous = self.memo.borrow_mut().take();
        drop(previous);
    }
}

struct DirectoryHandle {
    id: u64,
    node: DirNode,
    kind: EntryKind,
    is_legacy: bool,
    legacy_prefix: Option<String>,
}

impl Drop for DirectoryHandle {
    fn drop(&mut self) {
        remove_reference(&self.node);
    }
}

/// One configured search root for entries of a single kind.
///
/// Clones share identity; [`EntryDirectoryList::same_as`] compares it.
#[derive(Clone)]
pub struct EntryDirectory(Rc<DirectoryHandle>);

impl fmt::Debug for EntryDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryDirectory")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("legacy", &self.0.is_legacy)
            .finish()
    }
}

impl EntryDirectory {
    /// Opens `path` as a search root. Returns `None` if it cannot be canonicalized.
    pub fn new(cache: &EntryCache, kind: EntryKind, path: &Path) -> Option<Self> {
        Self::open(cache, kind, path, false, None)
    }

    /// Opens `path` as a legacy root whose application ids are `prefix-basename`.
    pub fn new_legacy(
        cache: &EntryCache,
        kind: EntryKind,
        path: &Path,
        prefix: Option<&str>,
    ) -> Option<Self> {
        Self::open(cache, kind, path, true, prefix)
    }

    fn open(
        cache: &EntryCache,
        kind: EntryKind,
        path: &Path,
        is_legacy: bool,
        prefix: Option<&str>,
    ) -> Option<Self> {
        let canonical = crate::linux_fs::canonicalize(path)?;
        let node = cache.lookup(&canonical);
        add_reference(&node);

        let id = cache.next_directory_id.get() + 1;
        cache.next_directory_id.set(id);
        let directory = Self(Rc::new(DirectoryHandle {
            id,
            node,
            kind,
            is_legacy,
            legacy_prefix: prefix.map(str::to_string),
        }));

        if !cache.load_entries_recursive(&directory.0.node, &canonical) {
            debug!(path = %canonical.display(), "Entry directory could not be read");
        }
        Some(directory)
    }

    pub fn kind(&self) -> EntryKind {
        self.0.kind
    }

    pub fn is_legacy(&self) -> bool {
        self.0.is_legacy
    }

    /// Derives the desktop file id of `kind` for the entry at `relative_path`.
    pub fn desktop_file_id(&self, kind: EntryKind, relative_path: &str) -> String {
        match kind {
            EntryKind::Application if !self.0.is_legacy => relative_path.replace('/', "-"),
            EntryKind::Application => {
                let basename = relative_path.rsplit('/').next().unwrap_or(relative_path);
                match &self.0.legacy_prefix {
                    Some(prefix) => format!("{prefix}-{basename}"),
                    None => basename.to_string(),
                }
            }
            EntryKind::Directory => relative_path.to_string(),
        }
    }

    /// The `.directory` entry at `relative_path`, for directory roots only.
    pub fn get_directory(&self, relative_path: &str) -> Option<DesktopEntry> {
        if self.0.kind != EntryKind::Directory {
            return None;
        }
        find_relative_path(&self.0.node, relative_path)
            .filter(|entry| entry.kind() == EntryKind::Directory)
    }

    /// Visits every entry of this root's kind, depth first, skipping deleted subtrees.
    ///
    /// Stops as soon as `f` returns `false`; the return value tells whether the walk ran to
    /// completion.
    pub fn foreach_recursive(&self, mut f: impl FnMut(&str, &DesktopEntry) -> bool) -> bool {
        self.walk(&self.0.node, "", &mut f)
    }

    fn walk(
        &self,
        node: &DirNode,
        prefix: &str,
        f: &mut dyn FnMut(&str, &DesktopEntry) -> bool,
    ) -> bool {
        let (entries, subdirs) = {
            let dir = node.borrow();
            if dir.deleted {
                return true;
            }
            (dir.entries.clone(), dir.subdirs.clone())
        };

        for entry in entries.iter().filter(|e| e.kind() == self.0.kind) {
            let relative = format!("{prefix}{}", entry.basename());
            let id = self.desktop_file_id(self.0.kind, &relative);
            if !f(&id, entry) {
                return false;
            }
        }

        for sub in &subdirs {
            let sub_prefix = format!("{prefix}{}/", sub.borrow().name);
            if !self.walk(sub, &sub_prefix, f) {
                return false;
            }
        }
        true
    }

    /// Single-level listing of the root: applications keyed by id, directory entries keyed
    /// by basename, and the names of live subdirectories in name order.
    pub fn get_flat_contents(
        &self,
        desktops: Option<&mut DesktopEntrySet>,
        directories: Option<&mut DesktopEntrySet>,
        subdirs: Option<&mut Vec<String>>,
    ) {
        let dir = self.0.node.borrow();

        if let Some(desktops) = desktops {
            for entry in dir
                .entries
                .iter()
                .filter(|e| e.kind() == EntryKind::Application)
            {
                let id = self.desktop_file_id(EntryKind::Application, entry.basename());
                desktops.add_entry(entry.clone(), id);
            }
        }

        if let Some(directories) = directories {
            for entry in dir
                .entries
                .iter()
                .filter(|e| e.kind() == EntryKind::Directory)
            {
                directories.add_entry(entry.clone(), entry.basename());
            }
        }

        if let Some(subdirs) = subdirs {
            subdirs.extend(
                dir.subdirs
                    .iter()
                    .map(|sub| sub.borrow())
                    .filter(|sub| !sub.deleted)
                    .map(|sub| sub.name.clone()),
            );
        }
    }

    /// Runs `callback` whenever anything below this root changes. Registering the same owner
    /// twice on one root is a no-op.
    pub fn add_monitor(&self, owner: MonitorOwner, callback: DirectoryCallback) {
        let mut dir = self.0.node.borrow_mut();
        let exists = dir
            .monitors
            .iter()
            .any(|m| m.directory == self.0.id && m.owner == owner);
        if !exists {
            dir.monitors.push(DirMonitor {
                directory: self.0.id,
                owner,
                callback,
            });
        }
    }

    pub fn remove_monitor(&self, owner: MonitorOwner) {
        self.0
            .node
            .borrow_mut()
            .monitors
            .retain(|m| !(m.directory == self.0.id && m.owner == owner));
    }
}

/// Search roots in priority order, highest first.
#[derive(Debug, Clone, Default)]
pub struct EntryDirectoryList {
    dirs: Vec<EntryDirectory>,
}

impl EntryDirectoryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryDirectory> {
        self.dirs.iter()
    }

    /// Puts `directory` in front, making it the highest priority.
    pub fn prepend(&mut self, directory: EntryDirectory) {
        self.dirs.insert(0, directory);
    }

    /// Appends every root of `other`, keeping their order.
    pub fn append_list(&mut self, other: &EntryDirectoryList) {
        self.dirs.extend(other.dirs.iter().cloned());
    }

    /// Same length and the same roots, by identity, in the same order.
    pub fn same_as(&self, other: &EntryDirectoryList) -> bool {
        self.dirs.len() == other.dirs.len()
            && self
                .dirs
                .iter()
                .zip(&other.dirs)
                .all(|(a, b)| Rc::ptr_eq(&a.0, &b.0))
    }

    /// The first `.directory` entry found at `relative_path`.
    pub fn get_directory(&self, relative_path: &str) -> Option<DesktopEntry> {
        self.dirs
            .iter()
            .find_map(|directory| directory.get_directory(relative_path))
    }

    pub fn add_monitors(&self, owner: MonitorOwner, callback: &DirectoryCallback) {
        for directory in &self.dirs {
            directory.add_monitor(owner, Rc::clone(callback));
        }
    }

    pub fn remove_monitors(&self, owner: MonitorOwner) {
        for directory in &self.dirs {
            directory.remove_monitor(owner);
        }
    }
}
