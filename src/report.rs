//! Data structures for reporting resolved menus.
//!
//! [`MenuReport`] is serializable to JSON for machine-readable output. [`dump_lines`]
//! produces the plain text listing printed by the binary: one line per application.

// -- std imports
use std::path::PathBuf;

// -- crate imports
use serde::Serialize;

// -- module imports
use crate::tree::{Directory, Entry, MenuTree, SortKey, TreeItem};

/// A resolved menu tree.
#[derive(Debug, Serialize)]
pub struct MenuReport {
    /// The file the tree was requested for.
    pub menu_file: Option<PathBuf>,

    /// The file the tree was actually loaded from.
    pub canonical_path: Option<PathBuf>,

    pub sort_key: SortKey,

    /// The root menu; `None` when the menu could not be loaded.
    pub root: Option<DirectoryReport>,
}

impl MenuReport {
    pub fn from_tree(tree: &MenuTree) -> Self {
        Self {
            menu_file: tree.menu_file(),
            canonical_path: tree.canonical_path(),
            sort_key: tree.sort_key(),
            root: tree.root_directory().as_ref().map(DirectoryReport::from_directory),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DirectoryReport {
    pub menu_id: String,
    pub name: String,
    pub comment: Option<String>,
    pub icon: Option<String>,
    pub desktop_file: Option<PathBuf>,
    pub nodisplay: bool,

    /// Menu path as understood by [`MenuTree::directory_from_path`].
    pub path: String,

    pub contents: Vec<ItemReport>,
}

impl DirectoryReport {
    pub fn from_directory(directory: &Directory) -> Self {
        Self {
            menu_id: directory.menu_id().to_string(),
            name: directory.name(),
            comment: directory.comment(),
            icon: directory.icon(),
            desktop_file: directory.desktop_file_path(),
            nodisplay: directory.is_nodisplay(),
            path: directory.make_path(None),
            contents: directory
                .contents()
                .iter()
                .map(ItemReport::from_item)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntryReport {
    pub desktop_file_id: String,
    pub name: String,
    pub generic_name: Option<String>,
    pub comment: Option<String>,
    pub icon: Option<String>,
    pub exec: Option<String>,
    pub terminal: bool,
    pub desktop_file: PathBuf,
    pub excluded: bool,
    pub nodisplay: bool,
}

impl EntryReport {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            desktop_file_id: entry.desktop_file_id().to_string(),
            name: entry.display_name().to_string(),
            generic_name: entry.generic_name().map(str::to_string),
            comment: entry.comment().map(str::to_string),
            icon: entry.icon().map(str::to_string),
            exec: entry.exec().map(str::to_string),
            terminal: entry.launch_in_terminal(),
            desktop_file: entry.desktop_file_path().to_path_buf(),
            excluded: entry.is_excluded(),
            nodisplay: entry.is_nodisplay(),
        }
    }
}

/// One item of a directory's contents.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemReport {
    Directory(DirectoryReport),
    Entry(EntryReport),
    Separator,

    /// Label of an inlined directory; its items follow in the same contents.
    Header { menu_id: String, name: String },

    /// A directory shown as its only item.
    Alias {
        menu_id: String,
        name: String,
        item: Box<ItemReport>,
    },
}

impl ItemReport {
    pub fn from_item(item: &TreeItem) -> Self {
        match item {
            TreeItem::Directory(directory) => {
                Self::Directory(DirectoryReport::from_directory(directory))
            }
            TreeItem::Entry(entry) => Self::Entry(EntryReport::from_entry(entry)),
            TreeItem::Separator(_) => Self::Separator,
            TreeItem::Header(header) => Self::Header {
                menu_id: header.directory().menu_id().to_string(),
                name: header.directory().name(),
            },
            TreeItem::Alias(alias) => Self::Alias {
                menu_id: alias.directory().menu_id().to_string(),
                name: alias.directory().name(),
                item: Box::new(Self::from_item(alias.item())),
            },
        }
    }
}

/// Text listing of every application reachable from `root`, in display order.
///
/// Each line reads `{path}\t{desktop file id}\t{desktop file}` with ` <excluded>` and
/// ` <nodisplay>` appended as they apply. `path` is `/` for the root and otherwise the
/// display names of the enclosing menus, each followed by `/`.
pub fn dump_lines(root: &Directory) -> Vec<String> {
    let mut lines = Vec::new();
    dump_directory(root, None, &mut lines);
    lines
}

fn dump_directory(directory: &Directory, path: Option<&str>, lines: &mut Vec<String>) {
    let here = path.unwrap_or("/");
    for item in directory.contents() {
        match &item {
            TreeItem::Entry(entry) => lines.push(entry_line(here, entry)),
            TreeItem::Alias(alias) => match alias.item() {
                TreeItem::Entry(entry) => lines.push(entry_line(here, entry)),
                TreeItem::Directory(target) => {
                    let nested = format!("{}{}/", path.unwrap_or_default(), alias.directory().name());
                    dump_directory(target, Some(&nested), lines);
                }
                _ => {}
            },
            TreeItem::Directory(subdir) => {
                let nested = format!("{}{}/", path.unwrap_or_default(), subdir.name());
                dump_directory(subdir, Some(&nested), lines);
            }
            TreeItem::Separator(_) | TreeItem::Header(_) => {}
        }
    }
}

fn entry_line(path: &str, entry: &Entry) -> String {
    let mut line = format!(
        "{path}\t{}\t{}",
        entry.desktop_file_id(),
        entry.desktop_file_path().display()
    );
    if entry.is_excluded() {
        line.push_str(" <excluded>");
    }
    if entry.is_nodisplay() {
        line.push_str(" <nodisplay>");
    }
    line
}
