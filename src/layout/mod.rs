//! Menu file document model.
//!
//! A loaded menu file is a [`LayoutTree`]: an arena of typed nodes addressed by [`NodeId`],
//! with ordered child lists and parent links. Detached nodes stay in the arena; they are
//! simply unreachable from the root.
//!
//! A `<Menu>` node lazily resolves the entry directories it can see: its own `<AppDir>`,
//! `<DirectoryDir>`, and `<LegacyDir>` children in front of everything its parent menu sees.
//! Those directories report changes through the tree's entries-changed signal.

// -- std imports
use std::{
    cell::RefCell,
    fmt,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

// -- crate imports
use bitflags::bitflags;

// -- module imports
use crate::{
    desktop_entries::EntryKind,
    entry_directories::{
        DirectoryCallback, EntryCache, EntryDirectory, EntryDirectoryList, MonitorOwner,
    },
};

pub mod parser;

pub use parser::{load, parse};

/// Index of a node within its [`LayoutTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// `type` attribute of `<MergeFile>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeFileType {
    #[default]
    Path,
    Parent,
}

/// `type` attribute of a layout `<Merge>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeType {
    None,
    Menus,
    Files,
    All,
}

impl MergeType {
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some("menus") => Self::Menus,
            Some("files") => Self::Files,
            Some("all") => Self::All,
            _ => Self::None,
        }
    }
}

bitflags! {
    /// Which layout attributes were given explicitly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LayoutMask: u8 {
        const SHOW_EMPTY = 1 << 0;
        const INLINE_MENUS = 1 << 1;
        const INLINE_LIMIT = 1 << 2;
        const INLINE_HEADER = 1 << 3;
        const INLINE_ALIAS = 1 << 4;
    }
}

/// Attributes of `<DefaultLayout>` and `<Menuname>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutValues {
    pub mask: LayoutMask,
    pub show_empty: bool,
    pub inline_menus: bool,
    pub inline_limit: u32,
    pub inline_header: bool,
    pub inline_alias: bool,
}

impl Default for LayoutValues {
    fn default() -> Self {
        Self {
            mask: LayoutMask::empty(),
            show_empty: false,
            inline_menus: false,
            inline_limit: 4,
            inline_header: false,
            inline_alias: false,
        }
    }
}

impl LayoutValues {
    /// Builds values from raw attribute strings.
    ///
    /// Booleans are true only for the literal `true`. An `inline_limit` that is not a whole
    /// number is ignored and leaves the default in place.
    pub fn from_attributes(
        show_empty: Option<&str>,
        inline_menus: Option<&str>,
        inline_limit: Option<&str>,
        inline_header: Option<&str>,
        inline_alias: Option<&str>,
    ) -> Self {
        let mut values = Self::default();

        if let Some(v) = show_empty {
            values.show_empty = v == "true";
            values.mask |= LayoutMask::SHOW_EMPTY;
        }
        if let Some(v) = inline_menus {
            values.inline_menus = v == "true";
            values.mask |= LayoutMask::INLINE_MENUS;
        }
        if let Some(v) = inline_limit {
            let parsed = if v.is_empty() { Some(0) } else { v.parse::<u32>().ok() };
            if let Some(limit) = parsed {
                values.inline_limit = limit;
                values.mask |= LayoutMask::INLINE_LIMIT;
            }
        }
        if let Some(v) = inline_header {
            values.inline_header = v == "true";
            values.mask |= LayoutMask::INLINE_HEADER;
        }
        if let Some(v) = inline_alias {
            values.inline_alias = v == "true";
            values.mask |= LayoutMask::INLINE_ALIAS;
        }
        values
    }

    /// Fills every attribute not given explicitly from `defaults`.
    pub fn with_defaults(mut self, defaults: &LayoutValues) -> Self {
        if !self.mask.contains(LayoutMask::SHOW_EMPTY) {
            self.show_empty = defaults.show_empty;
        }
        if !self.mask.contains(LayoutMask::INLINE_MENUS) {
            self.inline_menus = defaults.inline_menus;
        }
        if !self.mask.contains(LayoutMask::INLINE_LIMIT) {
            self.inline_limit = defaults.inline_limit;
        }
        if !self.mask.contains(LayoutMask::INLINE_HEADER) {
            self.inline_header = defaults.inline_header;
        }
        if !self.mask.contains(LayoutMask::INLINE_ALIAS) {
            self.inline_alias = defaults.inline_alias;
        }
        self
    }
}

struct MonitoredList {
    list: EntryDirectoryList,
    owner: MonitorOwner,
}

impl Drop for MonitoredList {
    fn drop(&mut self) {
        self.list.remove_monitors(self.owner);
    }
}

/// Per-`<Menu>` cache of resolved entry directories.
#[derive(Default)]
pub struct MenuData {
    app_dirs: RefCell<Option<Rc<MonitoredList>>>,
    dir_dirs: RefCell<Option<Rc<MonitoredList>>>,
}

impl MenuData {
    fn clear(&self, apps: bool) -> bool {
        let slot = if apps { &self.app_dirs } else { &self.dir_dirs };
        let has_dirs = slot
            .borrow()
            .as_ref()
            .is_some_and(|lists| !lists.list.is_empty());
        if has_dirs {
            let previous = slot.borrow_mut().take();
            drop(previous);
        }
        has_dirs
    }

    fn clear_all(&self) {
        let apps = self.app_dirs.borrow_mut().take();
        let dirs = self.dir_dirs.borrow_mut().take();
        drop(apps);
        drop(dirs);
    }
}

impl fmt::Debug for MenuData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuData")
            .field("app_dirs", &self.app_dirs.borrow().as_ref().map(|l| l.list.len()))
            .field("dir_dirs", &self.dir_dirs.borrow().as_ref().map(|l| l.list.len()))
            .finish()
    }
}

/// Element type of a node, with the attributes it carries.
#[derive(Debug)]
pub enum NodeKind {
    Root,
    Passthrough,
    Menu(MenuData),
    AppDir,
    DefaultAppDirs,
    DirectoryDir,
    DefaultDirectoryDirs,
    DefaultMergeDirs,
    Name,
    Directory,
    OnlyUnallocated,
    NotOnlyUnallocated,
    Include,
    Exclude,
    Filename,
    Category,
    All,
    And,
    Or,
    Not,
    MergeFile(MergeFileType),
    MergeDir,
    LegacyDir { prefix: Option<String> },
    KdeLegacyDirs,
    Move,
    Old,
    New,
    Deleted,
    NotDeleted,
    Layout,
    DefaultLayout(LayoutValues),
    Menuname(LayoutValues),
    Separator,
    Merge(MergeType),
}

impl NodeKind {
    pub fn menu() -> Self {
        Self::Menu(MenuData::default())
    }

    /// Element name as written in menu files.
    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Root => "Root",
            Self::Passthrough => "Passthrough",
            Self::Menu(_) => "Menu",
            Self::AppDir => "AppDir",
            Self::DefaultAppDirs => "DefaultAppDirs",
            Self::DirectoryDir => "DirectoryDir",
            Self::DefaultDirectoryDirs => "DefaultDirectoryDirs",
            Self::DefaultMergeDirs => "DefaultMergeDirs",
            Self::Name => "Name",
            Self::Directory => "Directory",
            Self::OnlyUnallocated => "OnlyUnallocated",
            Self::NotOnlyUnallocated => "NotOnlyUnallocated",
            Self::Include => "Include",
            Self::Exclude => "Exclude",
            Self::Filename => "Filename",
            Self::Category => "Category",
            Self::All => "All",
            Self::And => "And",
            Self::Or => "Or",
            Self::Not => "Not",
            Self::MergeFile(_) => "MergeFile",
            Self::MergeDir => "MergeDir",
            Self::LegacyDir { .. } => "LegacyDir",
            Self::KdeLegacyDirs => "KDELegacyDirs",
            Self::Move => "Move",
            Self::Old => "Old",
            Self::New => "New",
            Self::Deleted => "Deleted",
            Self::NotDeleted => "NotDeleted",
            Self::Layout => "Layout",
            Self::DefaultLayout(_) => "DefaultLayout",
            Self::Menuname(_) => "Menuname",
            Self::Separator => "Separator",
            Self::Merge(_) => "Merge",
        }
    }

    pub fn is_menu(&self) -> bool {
        matches!(self, Self::Menu(_))
    }

    /// Kinds whose content names a file or directory.
    fn holds_path(&self) -> bool {
        matches!(
            self,
            Self::AppDir
                | Self::DirectoryDir
                | Self::LegacyDir { .. }
                | Self::MergeFile(_)
                | Self::MergeDir
        )
    }

    /// Same kind and attributes, with fresh caches.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Root => Self::Root,
            Self::Passthrough => Self::Passthrough,
            Self::Menu(_) => Self::menu(),
            Self::AppDir => Self::AppDir,
            Self::DefaultAppDirs => Self::DefaultAppDirs,
            Self::DirectoryDir => Self::DirectoryDir,
            Self::DefaultDirectoryDirs => Self::DefaultDirectoryDirs,
            Self::DefaultMergeDirs => Self::DefaultMergeDirs,
            Self::Name => Self::Name,
            Self::Directory => Self::Directory,
            Self::OnlyUnallocated => Self::OnlyUnallocated,
            Self::NotOnlyUnallocated => Self::NotOnlyUnallocated,
            Self::Include => Self::Include,
            Self::Exclude => Self::Exclude,
            Self::Filename => Self::Filename,
            Self::Category => Self::Category,
            Self::All => Self::All,
            Self::And => Self::And,
            Self::Or => Self::Or,
            Self::Not => Self::Not,
            Self::MergeFile(t) => Self::MergeFile(*t),
            Self::MergeDir => Self::MergeDir,
            Self::LegacyDir { prefix } => Self::LegacyDir {
                prefix: prefix.clone(),
            },
            Self::KdeLegacyDirs => Self::KdeLegacyDirs,
            Self::Move => Self::Move,
            Self::Old => Self::Old,
            Self::New => Self::New,
            Self::Deleted => Self::Deleted,
            Self::NotDeleted => Self::NotDeleted,
            Self::Layout => Self::Layout,
            Self::DefaultLayout(v) => Self::DefaultLayout(*v),
            Self::Menuname(v) => Self::Menuname(*v),
            Self::Separator => Self::Separator,
            Self::Merge(t) => Self::Merge(*t),
        }
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    content: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Subscribers notified when an entry directory seen by any menu of the tree changes.
#[derive(Default)]
pub struct EntriesSignal {
    subscribers: RefCell<Vec<(usize, Rc<dyn Fn()>)>>,
}

impl EntriesSignal {
    /// Runs every subscriber; subscribers may unsubscribe while running.
    pub fn emit(&self) {
        let subscribers: Vec<Rc<dyn Fn()>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in subscribers {
            callback();
        }
    }
}

/// A parsed menu file.
pub struct LayoutTree {
    nodes: Vec<Node>,
    root: NodeId,
    basedir: Option<PathBuf>,
    name: Option<String>,
    entries_changed: Rc<EntriesSignal>,
}

impl fmt::Debug for LayoutTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutTree")
            .field("basedir", &self.basedir)
            .field("name", &self.name)
            .field("outline", &self.outline(self.root))
            .finish()
    }
}

impl LayoutTree {
    /// An empty document holding only the root node.
    pub fn new(basedir: Option<PathBuf>, name: Option<String>) -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                content: None,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
            basedir,
            name,
            entries_changed: Rc::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Directory of the file this tree was loaded from.
    pub fn basedir(&self) -> Option<&Path> {
        self.basedir.as_deref()
    }

    /// File basename without the `.menu` suffix.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn content(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].content.as_deref()
    }

    pub fn set_content(&mut self, id: NodeId, content: Option<String>) {
        self.nodes[id.0].content = content;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// The sibling following `id`, if any.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&c| c == id)?;
        siblings.get(index + 1).copied()
    }

    /// Allocates a detached node.
    pub fn new_node(&mut self, kind: NodeKind, content: Option<String>) -> NodeId {
        self.nodes.push(Node {
            kind,
            content,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[parent.0].children.insert(0, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Puts `node` right before `sibling` under the same parent.
    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        self.insert_relative(sibling, node, 0);
    }

    /// Puts `node` right after `sibling` under the same parent.
    pub fn insert_after(&mut self, sibling: NodeId, node: NodeId) {
        self.insert_relative(sibling, node, 1);
    }

    fn insert_relative(&mut self, sibling: NodeId, node: NodeId, offset: usize) {
        self.detach(node);
        let Some(parent) = self.parent(sibling) else {
            return;
        };
        let siblings = &mut self.nodes[parent.0].children;
        let index = siblings
            .iter()
            .position(|&c| c == sibling)
            .map_or(siblings.len(), |i| i + offset);
        siblings.insert(index, node);
        self.nodes[node.0].parent = Some(parent);
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Detaches `id` from its parent, keeping the subtree reusable.
    ///
    /// Removing an `<AppDir>` or `<DirectoryDir>` invalidates the entry directories cached by
    /// the parent menu and its descendants.
    pub fn steal(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            match self.kind(id) {
                NodeKind::AppDir => self.clean_dir_lists(parent, true),
                NodeKind::DirectoryDir => self.clean_dir_lists(parent, false),
                _ => {}
            }
        }
        self.detach(id);
    }

    fn clean_dir_lists(&self, menu: NodeId, apps: bool) {
        let NodeKind::Menu(data) = self.kind(menu) else {
            return;
        };
        if !data.clear(apps) {
            return;
        }
        for &child in self.children(menu) {
            self.clean_dir_lists(child, apps);
        }
    }

    /// Detaches `id` and releases everything its subtree holds.
    pub fn unlink(&mut self, id: NodeId) {
        self.steal(id);
        self.release(id);
    }

    fn release(&self, id: NodeId) {
        if let NodeKind::Menu(data) = self.kind(id) {
            data.clear_all();
        }
        for &child in self.children(id) {
            self.release(child);
        }
    }

    /// Copies the subtree at `node` of `from` into this arena as a detached node.
    ///
    /// Relative paths in the copied subtree are resolved against the basedir of `from`.
    pub fn graft(&mut self, from: &LayoutTree, node: NodeId) -> NodeId {
        let kind = from.kind(node);
        let content = match (kind.holds_path(), from.content(node)) {
            (true, Some(_)) => from
                .content_as_path(node)
                .map(|p| p.to_string_lossy().into_owned()),
            (_, content) => content.map(str::to_string),
        };

        let copy = self.new_node(kind.duplicate(), content);
        for &child in from.children(node) {
            let child_copy = self.graft(from, child);
            self.append_child(copy, child_copy);
        }
        copy
    }

    /// First `<Menu>` child of `id`.
    pub fn find_menu_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.kind(c).is_menu())
    }

    /// Content of the first `<Name>` child of a `<Menu>`.
    pub fn menu_name(&self, menu: NodeId) -> Option<&str> {
        self.children(menu)
            .iter()
            .find(|&&c| matches!(self.kind(c), NodeKind::Name))
            .and_then(|&c| self.content(c))
    }

    /// Content of a path-valued node: absolute content verbatim, relative content joined to
    /// the basedir.
    pub fn content_as_path(&self, id: NodeId) -> Option<PathBuf> {
        let content = self.content(id)?;
        let path = Path::new(content);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        match &self.basedir {
            Some(basedir) => Some(basedir.join(path)),
            None => Some(path.to_path_buf()),
        }
    }

    /// `<Old>` content of a `<Move>`.
    pub fn move_old(&self, id: NodeId) -> Option<&str> {
        self.child_content(id, |k| matches!(k, NodeKind::Old))
    }

    /// `<New>` content of a `<Move>`.
    pub fn move_new(&self, id: NodeId) -> Option<&str> {
        self.child_content(id, |k| matches!(k, NodeKind::New))
    }

    fn child_content(&self, id: NodeId, pred: impl Fn(&NodeKind) -> bool) -> Option<&str> {
        self.children(id)
            .iter()
            .find(|&&c| pred(self.kind(c)))
            .and_then(|&c| self.content(c))
    }

    /// Application directories visible from `menu`, highest priority first.
    pub fn app_dirs(&self, cache: &EntryCache, menu: NodeId) -> EntryDirectoryList {
        self.dir_list(cache, menu, true)
    }

    /// `.directory` search roots visible from `menu`, highest priority first.
    pub fn directory_dirs(&self, cache: &EntryCache, menu: NodeId) -> EntryDirectoryList {
        self.dir_list(cache, menu, false)
    }

    fn dir_list(&self, cache: &EntryCache, menu: NodeId, apps: bool) -> EntryDirectoryList {
        let NodeKind::Menu(data) = self.kind(menu) else {
            return EntryDirectoryList::new();
        };
        let slot = if apps { &data.app_dirs } else { &data.dir_dirs };
        if let Some(cached) = &*slot.borrow() {
            return cached.list.clone();
        }

        let mut list = EntryDirectoryList::new();
        if let Some(parent) = self.parent(menu) {
            if self.kind(parent).is_menu() {
                list.append_list(&self.dir_list(cache, parent, apps));
            }
        }

        let kind = if apps {
            EntryKind::Application
        } else {
            EntryKind::Directory
        };
        for &child in self.children(menu) {
            let directory = match self.kind(child) {
                NodeKind::AppDir if apps => self
                    .content_as_path(child)
                    .and_then(|path| EntryDirectory::new(cache, kind, &path)),
                NodeKind::DirectoryDir if !apps => self
                    .content_as_path(child)
                    .and_then(|path| EntryDirectory::new(cache, kind, &path)),
                NodeKind::LegacyDir { prefix } => {
                    self.content_as_path(child).and_then(|path| {
                        EntryDirectory::new_legacy(cache, kind, &path, prefix.as_deref())
                    })
                }
                _ => None,
            };
            if let Some(directory) = directory {
                list.prepend(directory);
            }
        }

        let owner = MonitorOwner(Rc::as_ptr(&self.entries_changed) as usize, menu.0);
        let signal: Weak<EntriesSignal> = Rc::downgrade(&self.entries_changed);
        let callback: DirectoryCallback = Rc::new(move || {
            if let Some(signal) = signal.upgrade() {
                signal.emit();
            }
        });
        list.add_monitors(owner, &callback);

        let result = list.clone();
        *slot.borrow_mut() = Some(Rc::new(MonitoredList { list, owner }));
        result
    }

    /// Subscribes `callback` under `key`; an existing subscription with the same key is kept.
    pub fn add_entries_monitor(&self, key: usize, callback: Rc<dyn Fn()>) {
        let mut subscribers = self.entries_changed.subscribers.borrow_mut();
        if !subscribers.iter().any(|(k, _)| *k == key) {
            subscribers.push((key, callback));
        }
    }

    pub fn remove_entries_monitor(&self, key: usize) {
        self.entries_changed
            .subscribers
            .borrow_mut()
            .retain(|(k, _)| *k != key);
    }

    /// Compact rendering of a subtree, for logs and tests.
    pub fn outline(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_outline(id, &mut out);
        out
    }

    fn write_outline(&self, id: NodeId, out: &mut String) {
        out.push_str(self.kind(id).element_name());
        if let Some(content) = self.content(id) {
            out.push('(');
            out.push_str(content);
            out.push(')');
        }
        let children = self.children(id);
        if !children.is_empty() {
            out.push('[');
            for (i, &child) in children.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                self.write_outline(child, out);
            }
            out.push(']');
        }
    }
}

impl Drop for LayoutTree {
    fn drop(&mut self) {
        for node in &self.nodes {
            if let NodeKind::Menu(data) = &node.kind {
                data.clear_all();
            }
        }
    }
}
