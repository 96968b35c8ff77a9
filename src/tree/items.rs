//! Items of a resolved menu.
//!
//! A [`Directory`] owns its items; every item points back at its parent weakly. Items are
//! cheap handles and may be kept after the tree that produced them has been rebuilt.

// -- std imports
use std::{
    any::Any,
    cell::{Cell, Ref, RefCell},
    cmp::Ordering,
    fmt,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

// -- crate imports
use serde::Serialize;

// -- module imports
use super::{MenuTree, SortKey, TreeInner};
use crate::{
    desktop_entries::DesktopEntry,
    layout::{LayoutValues, MergeType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Directory,
    Entry,
    Separator,
    Header,
    Alias,
}

/// One child of a captured `<Layout>` or `<DefaultLayout>`.
#[derive(Debug, Clone)]
pub(crate) enum LayoutItem {
    Menuname(String, LayoutValues),
    Filename(String),
    Separator,
    Merge(MergeType),
}

#[derive(Default)]
struct ItemBase {
    parent: RefCell<Weak<DirectoryData>>,
    user_data: RefCell<Option<Box<dyn Any>>>,
}

impl ItemBase {
    fn new(parent: Option<&Directory>) -> Self {
        let base = Self::default();
        base.set_parent(parent);
        base
    }

    fn parent(&self) -> Option<Directory> {
        self.parent.borrow().upgrade().map(Directory)
    }

    fn set_parent(&self, parent: Option<&Directory>) {
        *self.parent.borrow_mut() = parent.map_or_else(Weak::new, |p| Rc::downgrade(&p.0));
    }
}

/// A submenu.
#[derive(Clone)]
pub struct Directory(pub(crate) Rc<DirectoryData>);

pub(crate) struct DirectoryData {
    base: ItemBase,
    pub(crate) name: String,
    pub(crate) directory_entry: RefCell<Option<DesktopEntry>>,
    pub(crate) tree: RefCell<Weak<TreeInner>>,
    pub(crate) subdirs: RefCell<Vec<TreeItem>>,
    pub(crate) entries: RefCell<Vec<TreeItem>>,
    pub(crate) contents: RefCell<Vec<TreeItem>>,
    pub(crate) default_layout_values: Cell<LayoutValues>,
    pub(crate) default_layout_info: RefCell<Vec<LayoutItem>>,
    pub(crate) layout_info: RefCell<Vec<LayoutItem>>,
    pub(crate) only_unallocated: Cell<bool>,
    pub(crate) is_root: bool,
    pub(crate) is_nodisplay: Cell<bool>,
    pub(crate) preprocessed: Cell<bool>,
    /// Content count at or below which the directory is inlined under a header; `0` means
    /// always.
    pub(crate) will_inline_header: Cell<Option<u16>>,
    pub(crate) pending_separator: Cell<bool>,
}

impl Directory {
    pub(crate) fn new(parent: Option<&Directory>, name: &str, is_root: bool) -> Self {
        Self(Rc::new(DirectoryData {
            base: ItemBase::new(parent),
            name: name.to_string(),
            directory_entry: RefCell::new(None),
            tree: RefCell::new(Weak::new()),
            subdirs: RefCell::new(Vec::new()),
            entries: RefCell::new(Vec::new()),
            contents: RefCell::new(Vec::new()),
            default_layout_values: Cell::new(LayoutValues::default()),
            default_layout_info: RefCell::new(Vec::new()),
            layout_info: RefCell::new(Vec::new()),
            only_unallocated: Cell::new(false),
            is_root,
            is_nodisplay: Cell::new(false),
            preprocessed: Cell::new(false),
            will_inline_header: Cell::new(None),
            pending_separator: Cell::new(false),
        }))
    }

    /// Display name: the `.directory` name when there is one, else the menu id.
    pub fn name(&self) -> String {
        match &*self.0.directory_entry.borrow() {
            Some(entry) => entry.name().to_string(),
            None => self.0.name.clone(),
        }
    }

    pub fn comment(&self) -> Option<String> {
        self.0
            .directory_entry
            .borrow()
            .as_ref()
            .and_then(|e| e.comment().map(str::to_string))
    }

    pub fn icon(&self) -> Option<String> {
        self.0
            .directory_entry
            .borrow()
            .as_ref()
            .and_then(|e| e.icon().map(str::to_string))
    }

    pub fn desktop_file_path(&self) -> Option<PathBuf> {
        self.0
            .directory_entry
            .borrow()
            .as_ref()
            .map(|e| e.path().to_path_buf())
    }

    /// The `<Name>` of the menu this directory was built from.
    pub fn menu_id(&self) -> &str {
        &self.0.name
    }

    pub fn is_nodisplay(&self) -> bool {
        self.0.is_nodisplay.get()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_root
    }

    /// Items in display order.
    pub fn contents(&self) -> Vec<TreeItem> {
        self.0.contents.borrow().clone()
    }

    pub fn parent(&self) -> Option<Directory> {
        self.0.base.parent()
    }

    /// The tree this directory belongs to, found through the root.
    ///
    /// `None` once the tree has been dropped or rebuilt, and for directories inlined under a
    /// header.
    pub fn tree(&self) -> Option<MenuTree> {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        if !current.0.is_root {
            return None;
        }
        let tree = current.0.tree.borrow().upgrade();
        tree.map(MenuTree::from_inner)
    }

    pub(crate) fn set_tree(&self, tree: Weak<TreeInner>) {
        *self.0.tree.borrow_mut() = tree;
    }

    /// `/`, each non-root menu id followed by `/`, then the basename of `entry` if given.
    pub fn make_path(&self, entry: Option<&Entry>) -> String {
        let mut path = String::new();
        self.append_path(&mut path);
        if let Some(entry) = entry {
            path.push_str(entry.0.desktop_entry.basename());
        }
        path
    }

    fn append_path(&self, path: &mut String) {
        let Some(parent) = self.parent() else {
            path.push('/');
            return;
        };
        parent.append_path(path);
        path.push_str(&self.0.name);
        path.push('/');
    }

    pub fn as_item(&self) -> TreeItem {
        TreeItem::Directory(self.clone())
    }

    pub fn ptr_eq(&self, other: &Directory) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("menu_id", &self.0.name)
            .field("contents", &self.0.contents.borrow().len())
            .finish()
    }
}

/// An application.
#[derive(Clone)]
pub struct Entry(pub(crate) Rc<EntryData>);

pub(crate) struct EntryData {
    base: ItemBase,
    desktop_entry: DesktopEntry,
    desktop_file_id: String,
    is_excluded: bool,
    is_nodisplay: bool,
}

impl Entry {
    pub(crate) fn new(
        parent: &Directory,
        desktop_entry: DesktopEntry,
        desktop_file_id: &str,
        is_excluded: bool,
        is_nodisplay: bool,
    ) -> Self {
        Self(Rc::new(EntryData {
            base: ItemBase::new(Some(parent)),
            desktop_entry,
            desktop_file_id: desktop_file_id.to_string(),
            is_excluded,
            is_nodisplay,
        }))
    }

    pub fn desktop_entry(&self) -> &DesktopEntry {
        &self.0.desktop_entry
    }

    pub fn name(&self) -> &str {
        self.0.desktop_entry.name()
    }

    pub fn generic_name(&self) -> Option<&str> {
        self.0.desktop_entry.generic_name()
    }

    /// The full name when the file has a non-empty one, else the name.
    pub fn display_name(&self) -> &str {
        match self.0.desktop_entry.full_name() {
            Some(full) if !full.is_empty() => full,
            _ => self.name(),
        }
    }

    pub fn comment(&self) -> Option<&str> {
        self.0.desktop_entry.comment()
    }

    pub fn icon(&self) -> Option<&str> {
        self.0.desktop_entry.icon()
    }

    pub fn exec(&self) -> Option<&str> {
        self.0.desktop_entry.exec()
    }

    pub fn launch_in_terminal(&self) -> bool {
        self.0.desktop_entry.launch_in_terminal()
    }

    pub fn desktop_file_path(&self) -> &Path {
        self.0.desktop_entry.path()
    }

    pub fn desktop_file_id(&self) -> &str {
        &self.0.desktop_file_id
    }

    /// Matched by an `<Exclude>`; only present when excluded entries were requested.
    pub fn is_excluded(&self) -> bool {
        self.0.is_excluded
    }

    pub fn is_nodisplay(&self) -> bool {
        self.0.is_nodisplay
    }

    pub fn parent(&self) -> Option<Directory> {
        self.0.base.parent()
    }

    pub fn as_item(&self) -> TreeItem {
        TreeItem::Entry(self.clone())
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("desktop_file_id", &self.0.desktop_file_id)
            .field("path", &self.0.desktop_entry.path())
            .finish()
    }
}

#[derive(Clone)]
pub struct Separator(Rc<SeparatorData>);

struct SeparatorData {
    base: ItemBase,
}

impl Separator {
    pub(crate) fn new(parent: &Directory) -> Self {
        Self(Rc::new(SeparatorData {
            base: ItemBase::new(Some(parent)),
        }))
    }

    pub fn parent(&self) -> Option<Directory> {
        self.0.base.parent()
    }
}

impl fmt::Debug for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Separator")
    }
}

/// Label for the inlined contents of a directory; the items follow it in the parent.
#[derive(Clone)]
pub struct Header(Rc<HeaderData>);

struct HeaderData {
    base: ItemBase,
    directory: Directory,
}

impl Header {
    pub(crate) fn new(parent: &Directory, directory: Directory) -> Self {
        directory.0.base.set_parent(None);
        Self(Rc::new(HeaderData {
            base: ItemBase::new(Some(parent)),
            directory,
        }))
    }

    pub fn directory(&self) -> &Directory {
        &self.0.directory
    }

    pub fn parent(&self) -> Option<Directory> {
        self.0.base.parent()
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Header").field(&self.0.directory).finish()
    }
}

/// A directory reduced to its single item, shown under the directory's name.
#[derive(Clone)]
pub struct Alias(Rc<AliasData>);

struct AliasData {
    base: ItemBase,
    directory: Directory,
    item: TreeItem,
}

impl Alias {
    /// Aliasing an alias points at the innermost item.
    pub(crate) fn new(parent: &Directory, directory: Directory, item: TreeItem) -> Self {
        let item = match item {
            TreeItem::Alias(alias) => alias.0.item.clone(),
            other => other,
        };
        directory.0.base.set_parent(None);
        item.set_parent(None);
        Self(Rc::new(AliasData {
            base: ItemBase::new(Some(parent)),
            directory,
            item,
        }))
    }

    pub fn directory(&self) -> &Directory {
        &self.0.directory
    }

    pub fn item(&self) -> &TreeItem {
        &self.0.item
    }

    pub fn item_type(&self) -> ItemType {
        self.0.item.item_type()
    }

    pub fn parent(&self) -> Option<Directory> {
        self.0.base.parent()
    }
}

impl fmt::Debug for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alias")
            .field("directory", &self.0.directory)
            .field("item", &self.0.item)
            .finish()
    }
}

/// Any item of a directory's contents.
#[derive(Debug, Clone)]
pub enum TreeItem {
    Directory(Directory),
    Entry(Entry),
    Separator(Separator),
    Header(Header),
    Alias(Alias),
}

impl TreeItem {
    pub fn item_type(&self) -> ItemType {
        match self {
            Self::Directory(_) => ItemType::Directory,
            Self::Entry(_) => ItemType::Entry,
            Self::Separator(_) => ItemType::Separator,
            Self::Header(_) => ItemType::Header,
            Self::Alias(_) => ItemType::Alias,
        }
    }

    fn base(&self) -> &ItemBase {
        match self {
            Self::Directory(d) => &d.0.base,
            Self::Entry(e) => &e.0.base,
            Self::Separator(s) => &s.0.base,
            Self::Header(h) => &h.0.base,
            Self::Alias(a) => &a.0.base,
        }
    }

    pub fn parent(&self) -> Option<Directory> {
        self.base().parent()
    }

    pub(crate) fn set_parent(&self, parent: Option<&Directory>) {
        self.base().set_parent(parent);
    }

    /// Attaches opaque data; the previous value, if any, is dropped.
    pub fn set_user_data(&self, data: Option<Box<dyn Any>>) {
        let previous = std::mem::replace(&mut *self.base().user_data.borrow_mut(), data);
        drop(previous);
    }

    pub fn user_data(&self) -> Option<Ref<'_, dyn Any>> {
        Ref::filter_map(self.base().user_data.borrow(), |data| data.as_deref()).ok()
    }

    pub fn ptr_eq(&self, other: &TreeItem) -> bool {
        match (self, other) {
            (Self::Directory(a), Self::Directory(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Entry(a), Self::Entry(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Separator(a), Self::Separator(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Header(a), Self::Header(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Alias(a), Self::Alias(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }

    /// Desktop file id of an entry or of the entry behind an alias.
    pub(crate) fn entry_id(&self) -> Option<&str> {
        match self {
            Self::Entry(entry) => Some(entry.desktop_file_id()),
            Self::Alias(alias) => alias.0.item.entry_id(),
            _ => None,
        }
    }

    fn sort_name(&self, key: SortKey) -> String {
        match self {
            Self::Directory(directory) => directory.name(),
            Self::Entry(entry) => match key {
                SortKey::Name => entry.name().to_string(),
                SortKey::DisplayName => entry.display_name().to_string(),
            },
            Self::Alias(alias) => alias.0.directory.name(),
            Self::Separator(_) | Self::Header(_) => String::new(),
        }
    }
}

/// Case-folded comparison, falling back to the raw strings.
pub(crate) fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

pub(crate) fn compare_items(a: &TreeItem, b: &TreeItem, key: SortKey) -> Ordering {
    collate(&a.sort_name(key), &b.sort_name(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop_entries::EntryLoader;
    use std::fs;
    use tempfile::TempDir;

    fn load_entry(dir: &TempDir, file: &str, content: &str) -> DesktopEntry {
        let path = dir.path().join(file);
        fs::write(&path, content).unwrap();
        EntryLoader::new("MATE", "").load(&path).unwrap()
    }

    fn app(dir: &TempDir, file: &str, name: &str) -> DesktopEntry {
        load_entry(
            dir,
            file,
            &format!("[Desktop Entry]\nType=Application\nName={name}\nExec=true\n"),
        )
    }

    #[test]
    fn test_make_path_and_parents() {
        let dir = TempDir::new().unwrap();
        let root = Directory::new(None, "Applications", true);
        let games = Directory::new(Some(&root), "Games", false);
        let arcade = Directory::new(Some(&games), "Arcade", false);
        let entry = Entry::new(&arcade, app(&dir, "pong.desktop", "Pong"), "pong.desktop", false, false);

        assert_eq!(root.make_path(None), "/");
        assert_eq!(arcade.make_path(None), "/Games/Arcade/");
        assert_eq!(arcade.make_path(Some(&entry)), "/Games/Arcade/pong.desktop");
        assert!(entry.parent().unwrap().ptr_eq(&arcade));
        assert!(arcade.tree().is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let dir = TempDir::new().unwrap();
        let root = Directory::new(None, "Root", true);
        let plain = Entry::new(&root, app(&dir, "a.desktop", "Alpha"), "a.desktop", false, false);
        let full = load_entry(
            &dir,
            "b.desktop",
            "[Desktop Entry]\nType=Application\nName=Beta\nX-MATE-FullName=Beta Suite\nExec=b\n",
        );
        let full = Entry::new(&root, full, "b.desktop", false, false);

        assert_eq!(plain.display_name(), "Alpha");
        assert_eq!(full.display_name(), "Beta Suite");
        assert_eq!(full.name(), "Beta");
    }

    #[test]
    fn test_alias_of_alias_points_at_item() {
        let dir = TempDir::new().unwrap();
        let root = Directory::new(None, "Root", true);
        let outer = Directory::new(Some(&root), "Outer", false);
        let inner = Directory::new(Some(&outer), "Inner", false);
        let entry = Entry::new(&inner, app(&dir, "x.desktop", "X"), "x.desktop", false, false);

        let first = Alias::new(&outer, inner.clone(), entry.as_item());
        let second = Alias::new(&root, outer.clone(), TreeItem::Alias(first));

        assert!(second.item().ptr_eq(&entry.as_item()));
        assert!(second.directory().ptr_eq(&outer));
        assert!(outer.parent().is_none());
        assert!(entry.parent().is_none());
        assert!(second.parent().unwrap().ptr_eq(&root));
        assert_eq!(TreeItem::Alias(second).entry_id(), Some("x.desktop"));
    }

    #[test]
    fn test_collate_folds_case_first() {
        let mut names = vec!["beta", "Alpha", "alpha", "Gamma"];
        names.sort_by(|a, b| collate(a, b));
        assert_eq!(names, vec!["Alpha", "alpha", "beta", "Gamma"]);
    }

    #[test]
    fn test_user_data_replaced_and_dropped() {
        let root = Directory::new(None, "Root", true);
        let item = root.as_item();
        assert!(item.user_data().is_none());

        let marker = Rc::new(());
        item.set_user_data(Some(Box::new(Rc::clone(&marker))));
        assert_eq!(Rc::strong_count(&marker), 2);
        assert!(item.user_data().unwrap().downcast_ref::<Rc<()>>().is_some());

        item.set_user_data(Some(Box::new(7u32)));
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(item.user_data().unwrap().downcast_ref::<u32>(), Some(&7));
    }
}
