//! Menu tree handles.
//!
//! A [`MenuTree`] names a toplevel menu file, either by basename (searched in the XDG config
//! directories) or by absolute path. Resolution is lazy: the file is located on first use,
//! parsed and resolved into a layout tree, and then built into a [`Directory`] tree. Each
//! stage is memoized until a filesystem notification invalidates it.
//!
//! Trees are cached per context under their file and flags, so two lookups of the same menu
//! share one handle.

mod arrange;
mod build;
pub mod items;
mod moves;
mod resolve;

// -- std imports
use std::{
    any::Any,
    cell::{Ref, RefCell},
    fmt,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

// -- crate imports
use bitflags::bitflags;
use serde::Serialize;
use tracing::{debug, warn};

// -- module imports
pub use items::{Alias, Directory, Entry, Header, ItemType, Separator, TreeItem};

use crate::{
    context::MenuContext,
    layout::{self, LayoutTree},
    linux_fs::canonicalize,
    monitor::{MonitorEvent, WatchGuard, WatchHandler, WatchKind},
};

bitflags! {
    /// Options of a tree lookup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TreeFlags: u32 {
        /// Keep entries matched by `<Exclude>`, marked as excluded.
        const INCLUDE_EXCLUDED = 1 << 0;
        /// Keep `NoDisplay` entries and directories, marked as such.
        const INCLUDE_NODISPLAY = 1 << 1;
        /// Keep menus without any items.
        const SHOW_EMPTY = 1 << 8;
        /// Materialize every `<Separator>` of a layout.
        const SHOW_ALL_SEPARATORS = 1 << 9;
    }
}

/// How entries are ordered where a layout merges them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    DisplayName,
}

/// Callback run after a tree was invalidated.
pub type TreeMonitor = Rc<dyn Fn(&MenuTree)>;

#[derive(Debug)]
enum TreeSource {
    Basename(String),
    Absolute(PathBuf),
}

/// What a file monitor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileMonitorKind {
    /// An existing file; any event.
    File,
    /// A path that may start existing; creation or change.
    NonexistentFile,
    /// A merge directory; events on `*.menu` children.
    Directory,
}

#[derive(Default)]
struct TreeState {
    canonical_path: Option<PathBuf>,
    sort_key: SortKey,
    layout: Option<LayoutTree>,
    root: Option<Directory>,
    file_monitors: Vec<WatchGuard>,
}

pub(crate) struct TreeInner {
    context: MenuContext,
    source: TreeSource,
    flags: TreeFlags,
    state: RefCell<TreeState>,
    monitors: RefCell<Vec<TreeMonitor>>,
    user_data: RefCell<Option<Box<dyn Any>>>,
    cache_key: RefCell<String>,
}

impl Drop for TreeInner {
    fn drop(&mut self) {
        let user_data = self.user_data.borrow_mut().take();
        drop(user_data);

        let key = self.cache_key.borrow().clone();
        self.context.uncache_tree(&key, self as *const TreeInner);

        let state = std::mem::take(&mut *self.state.borrow_mut());
        drop(state);
    }
}

/// Handle to a resolved menu; cloning shares the tree.
#[derive(Clone)]
pub struct MenuTree(Rc<TreeInner>);

impl fmt::Debug for MenuTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("MenuTree")
            .field("source", &self.0.source)
            .field("flags", &self.0.flags)
            .field("canonical_path", &state.canonical_path)
            .field("built", &state.root.is_some())
            .finish()
    }
}

impl MenuTree {
    /// Returns the cached tree for `menu_file` and `flags`, creating it on a miss.
    ///
    /// `menu_file` is an absolute path or a basename such as `applications.menu`. The lookup
    /// never fails: a menu that cannot be found yields a tree without a root directory,
    /// which keeps watching for the file to appear.
    pub fn lookup(context: &MenuContext, menu_file: &str, flags: TreeFlags) -> MenuTree {
        if Path::new(menu_file).is_absolute() {
            Self::lookup_absolute(context, Path::new(menu_file), flags)
        } else {
            Self::lookup_basename(context, menu_file, flags)
        }
    }

    fn lookup_absolute(context: &MenuContext, path: &Path, flags: TreeFlags) -> MenuTree {
        debug!(path = %path.display(), ?flags, "Looking up absolute menu tree");
        if let Some(tree) = context.cached_tree(&cache_key(&path.to_string_lossy(), flags)) {
            return tree;
        }

        let canonical = canonicalize(path);
        if let Some(canonical) = &canonical {
            let key = cache_key(&canonical.to_string_lossy(), flags);
            if let Some(tree) = context.cached_tree(&key) {
                return tree;
            }
        }

        let tree = Self::new(context, TreeSource::Absolute(path.to_path_buf()), flags);
        match canonical {
            Some(canonical) => {
                tree.add_file_monitor(&canonical, FileMonitorKind::File);
                tree.0.state.borrow_mut().canonical_path = Some(canonical);
            }
            None => tree.add_file_monitor(path, FileMonitorKind::NonexistentFile),
        }
        tree.add_to_cache();
        tree
    }

    fn lookup_basename(context: &MenuContext, basename: &str, flags: TreeFlags) -> MenuTree {
        debug!(basename, ?flags, "Looking up menu tree by basename");
        if let Some(tree) = context.cached_tree(&cache_key(basename, flags)) {
            return tree;
        }
        let tree = Self::new(context, TreeSource::Basename(basename.to_string()), flags);
        tree.add_to_cache();
        tree
    }

    fn new(context: &MenuContext, source: TreeSource, flags: TreeFlags) -> MenuTree {
        MenuTree(Rc::new(TreeInner {
            context: context.clone(),
            source,
            flags,
            state: RefCell::new(TreeState::default()),
            monitors: RefCell::new(Vec::new()),
            user_data: RefCell::new(None),
            cache_key: RefCell::new(String::new()),
        }))
    }

    pub(crate) fn from_inner(inner: Rc<TreeInner>) -> MenuTree {
        MenuTree(inner)
    }

    pub fn context(&self) -> &MenuContext {
        &self.0.context
    }

    pub fn flags(&self) -> TreeFlags {
        self.0.flags
    }

    pub fn ptr_eq(&self, other: &MenuTree) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn current_key(&self) -> String {
        let state = self.0.state.borrow();
        match &self.0.source {
            TreeSource::Basename(basename) => cache_key(basename, self.0.flags),
            TreeSource::Absolute(path) => {
                let file = state.canonical_path.as_deref().unwrap_or(path);
                cache_key(&file.to_string_lossy(), self.0.flags)
            }
        }
    }

    fn add_to_cache(&self) {
        let key = self.current_key();
        self.0.context.cache_tree(key.clone(), &self.0);
        *self.0.cache_key.borrow_mut() = key;
    }

    fn remove_from_cache(&self) {
        let key = self.0.cache_key.borrow().clone();
        self.0.context.uncache_tree(&key, Rc::as_ptr(&self.0));
    }

    // -- file monitors

    pub(crate) fn add_file_monitor(&self, path: &Path, kind: FileMonitorKind) {
        let weak: Weak<TreeInner> = Rc::downgrade(&self.0);
        let handler: WatchHandler = Rc::new(move |event, changed: &Path| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let relevant = match kind {
                FileMonitorKind::File => true,
                FileMonitorKind::NonexistentFile => {
                    matches!(event, MonitorEvent::Created | MonitorEvent::Changed)
                }
                FileMonitorKind::Directory => {
                    changed.extension().is_some_and(|ext| ext == "menu")
                }
            };
            if !relevant {
                return;
            }
            debug!(path = %changed.display(), ?event, "Menu file changed, recanonicalizing");
            let tree = MenuTree(inner);
            tree.force_recanonicalize();
            tree.invoke_monitors();
        });

        let watch_kind = match kind {
            FileMonitorKind::Directory => WatchKind::Directory,
            FileMonitorKind::File | FileMonitorKind::NonexistentFile => WatchKind::File,
        };
        if let Some(guard) = self.0.context.hub().watch(path, watch_kind, handler) {
            self.0.state.borrow_mut().file_monitors.push(guard);
        }
    }

    fn remove_file_monitors(&self) {
        let monitors = std::mem::take(&mut self.0.state.borrow_mut().file_monitors);
        drop(monitors);
    }

    // -- canonicalization

    /// Locates the backing file. Returns whether the tree is canonical afterwards.
    fn canonicalize_path(&self) -> bool {
        if self.0.state.borrow().canonical_path.is_some() {
            return true;
        }
        match &self.0.source {
            TreeSource::Basename(basename) => self.canonicalize_basename(basename),
            TreeSource::Absolute(path) => self.canonicalize_absolute(path),
        }
    }

    fn canonicalize_basename(&self, basename: &str) -> bool {
        self.remove_file_monitors();
        let env = self.0.context.environment();
        for name in env.menu_file_candidates(basename) {
            for config_dir in env.config_dirs() {
                let path = config_dir.join("menus").join(&name);
                match canonicalize(&path) {
                    Some(canonical) => {
                        debug!(file = %canonical.display(), "Menu file located");
                        self.add_file_monitor(&canonical, FileMonitorKind::File);
                        self.0.state.borrow_mut().canonical_path = Some(canonical);
                        return true;
                    }
                    None => self.add_file_monitor(&path, FileMonitorKind::NonexistentFile),
                }
            }
        }
        debug!(basename, "Menu file not found in any config directory");
        false
    }

    fn canonicalize_absolute(&self, path: &Path) -> bool {
        let Some(canonical) = canonicalize(path) else {
            return false;
        };
        self.remove_from_cache();
        self.remove_file_monitors();
        self.add_file_monitor(&canonical, FileMonitorKind::File);
        self.0.state.borrow_mut().canonical_path = Some(canonical);
        self.add_to_cache();
        true
    }

    /// Forgets the backing file and everything derived from it.
    fn force_recanonicalize(&self) {
        self.remove_file_monitors();
        if self.0.state.borrow().canonical_path.is_some() {
            self.force_reload();
            self.0.state.borrow_mut().canonical_path = None;
        }
    }

    fn force_reload(&self) {
        self.force_rebuild();
        let layout = self.0.state.borrow_mut().layout.take();
        drop(layout);
    }

    /// Drops the built directory tree, keeping the parsed layout.
    fn force_rebuild(&self) {
        let root = self.0.state.borrow_mut().root.take();
        let Some(root) = root else {
            return;
        };
        root.set_tree(Weak::new());
        drop(root);
        if let Some(layout) = &self.0.state.borrow().layout {
            layout.remove_entries_monitor(self.monitor_key());
        }
    }

    fn monitor_key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    // -- resolution

    fn load_layout(&self) {
        if self.0.state.borrow().layout.is_some() {
            return;
        }
        if !self.canonicalize_path() {
            return;
        }
        let Some(canonical) = self.0.state.borrow().canonical_path.clone() else {
            return;
        };

        let basename = match &self.0.source {
            TreeSource::Basename(basename) => Some(basename.as_str()),
            TreeSource::Absolute(_) => None,
        };
        debug!(file = %canonical.display(), "Loading menu layout");
        let mut layout = match layout::load(&canonical, basename) {
            Ok(layout) => layout,
            Err(e) => {
                warn!(error = %e, "Error loading menu layout");
                return;
            }
        };

        let context = &self.0.context;
        let mut resolver =
            resolve::Resolver::new(context.environment(), context.entry_cache(), &canonical);
        let root = layout.root();
        resolver.resolve_files(&mut layout, root);
        for (path, kind) in resolver.into_monitors() {
            self.add_file_monitor(&path, kind);
        }

        moves::strip_duplicate_children(&mut layout, root);
        moves::execute_moves(&mut layout, root, None);

        self.0.state.borrow_mut().layout = Some(layout);
    }

    fn build_from_layout(&self) {
        if self.0.state.borrow().root.is_some() {
            return;
        }
        self.load_layout();

        let sort_key = self.0.state.borrow().sort_key;
        let root = {
            let state = self.0.state.borrow();
            let Some(layout) = &state.layout else {
                return;
            };
            let Some(menu) = layout.find_menu_child(layout.root()) else {
                return;
            };
            debug!("Building menu tree from layout");
            let builder = build::Builder::new(self.0.context.entry_cache(), self.0.flags);
            let Some(root) = builder.build(layout, menu) else {
                return;
            };

            let weak = Rc::downgrade(&self.0);
            layout.add_entries_monitor(
                self.monitor_key(),
                Rc::new(move || {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    debug!("Entry directories changed, rebuilding menu tree");
                    let tree = MenuTree(inner);
                    tree.force_rebuild();
                    tree.invoke_monitors();
                }),
            );
            root
        };

        root.set_tree(Rc::downgrade(&self.0));
        arrange::preprocess_layout_info(&root, self.0.flags);
        arrange::process_layout_info(&root, self.0.flags, sort_key);
        self.0.state.borrow_mut().root = Some(root);
    }

    // -- public accessors

    /// The backing file: the canonical file's basename for basename trees, the absolute
    /// path as passed to [`MenuTree::lookup`] otherwise. `None` until the file exists.
    pub fn menu_file(&self) -> Option<PathBuf> {
        if !self.canonicalize_path() {
            return None;
        }
        match &self.0.source {
            TreeSource::Basename(_) => {
                let state = self.0.state.borrow();
                let canonical = state.canonical_path.as_deref()?;
                canonical.file_name().map(PathBuf::from)
            }
            TreeSource::Absolute(path) => Some(path.clone()),
        }
    }

    /// The resolved backing file, once located.
    pub fn canonical_path(&self) -> Option<PathBuf> {
        self.canonicalize_path();
        self.0.state.borrow().canonical_path.clone()
    }

    /// The root of the resolved menu, built on demand.
    pub fn root_directory(&self) -> Option<Directory> {
        self.build_from_layout();
        self.0.state.borrow().root.clone()
    }

    /// The directory at a slash separated path of menu ids, such as `/Games/Arcade`.
    pub fn directory_from_path(&self, path: &str) -> Option<Directory> {
        if !path.starts_with('/') {
            return None;
        }
        let root = self.root_directory()?;
        find_path(&root, path)
    }

    pub fn sort_key(&self) -> SortKey {
        self.0.state.borrow().sort_key
    }

    /// Changing the key drops the built tree.
    pub fn set_sort_key(&self, sort_key: SortKey) {
        let changed = {
            let mut state = self.0.state.borrow_mut();
            let changed = state.sort_key != sort_key;
            state.sort_key = sort_key;
            changed
        };
        if changed {
            self.force_rebuild();
        }
    }

    /// Subscribes `callback` to invalidations; subscribing the same callback twice is a no-op.
    pub fn add_monitor(&self, callback: TreeMonitor) {
        let mut monitors = self.0.monitors.borrow_mut();
        if !monitors.iter().any(|m| Rc::ptr_eq(m, &callback)) {
            monitors.push(callback);
        }
    }

    pub fn remove_monitor(&self, callback: &TreeMonitor) {
        self.0
            .monitors
            .borrow_mut()
            .retain(|m| !Rc::ptr_eq(m, callback));
    }

    fn invoke_monitors(&self) {
        let monitors: Vec<TreeMonitor> = self.0.monitors.borrow().iter().cloned().collect();
        for monitor in monitors {
            monitor(self);
        }
    }

    /// Attaches opaque data; the previous value, if any, is dropped.
    pub fn set_user_data(&self, data: Option<Box<dyn Any>>) {
        let previous = std::mem::replace(&mut *self.0.user_data.borrow_mut(), data);
        drop(previous);
    }

    pub fn user_data(&self) -> Option<Ref<'_, dyn Any>> {
        Ref::filter_map(self.0.user_data.borrow(), |data| data.as_deref()).ok()
    }
}

fn cache_key(file: &str, flags: TreeFlags) -> String {
    format!("{file}:0x{:x}", flags.bits())
}

fn find_path(directory: &Directory, path: &str) -> Option<Directory> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Some(directory.clone());
    }
    let (name, rest) = match path.split_once('/') {
        Some((name, rest)) => (name, rest),
        None => (path, ""),
    };

    let contents = directory.contents();
    for item in contents {
        let TreeItem::Directory(subdir) = item else {
            continue;
        };
        if subdir.menu_id() == name {
            return find_path(&subdir, rest);
        }
    }
    None
}
