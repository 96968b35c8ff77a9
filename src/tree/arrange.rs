//! Turning the built directories into display contents.
//!
//! Arranging runs in two passes over a freshly built tree. The first pass applies the
//! inline hints: empty menus are dropped, small menus are folded into their parent, turned
//! into aliases or marked for an inline header. The second pass walks each directory's
//! layout and fills its contents in order, placing separators only between items.

// -- crate imports
use tracing::debug;

// -- module imports
use super::{
    SortKey, TreeFlags,
    items::{Alias, Directory, Header, LayoutItem, Separator, TreeItem, compare_items},
};
use crate::layout::{LayoutValues, MergeType};

/// The layout in effect for `directory` and whether it is a default layout.
///
/// A directory's own `<Layout>` wins. Otherwise the closest `<DefaultLayout>` up the parent
/// chain applies; with none at all the result is the implicit default.
fn layout_info(directory: &Directory) -> (Option<Vec<LayoutItem>>, bool) {
    let own = directory.0.layout_info.borrow();
    if !own.is_empty() {
        return (Some(own.clone()), false);
    }

    let mut current = Some(directory.clone());
    while let Some(dir) = current {
        let defaults = dir.0.default_layout_info.borrow();
        if !defaults.is_empty() {
            return (Some(defaults.clone()), true);
        }
        drop(defaults);
        current = dir.parent();
    }
    (None, true)
}

/// Number of items `directory` contributes once its header-inlined submenus are expanded.
fn real_subdirs_len(directory: &Directory) -> usize {
    directory
        .0
        .subdirs
        .borrow()
        .iter()
        .map(|item| match item {
            TreeItem::Directory(subdir) if subdir.0.will_inline_header.get().is_some() => {
                real_subdirs_len(subdir) + subdir.0.entries.borrow().len() + 1
            }
            _ => 1,
        })
        .sum()
}

fn position(items: &[TreeItem], item: &TreeItem) -> Option<usize> {
    items.iter().position(|candidate| candidate.ptr_eq(item))
}

/// The submenu a `<Menuname>` refers to.
///
/// Outside a default layout the search stops at `last`, so submenus that only appeared
/// through inlining are not matched.
fn find_subdir(
    directory: &Directory,
    name: &str,
    last: &TreeItem,
    using_default: bool,
) -> Option<Directory> {
    let subdirs = directory.0.subdirs.borrow();
    for item in subdirs.iter() {
        if let TreeItem::Directory(subdir) = item {
            if subdir.menu_id() == name {
                return Some(subdir.clone());
            }
        }
        if !using_default && item.ptr_eq(last) {
            break;
        }
    }
    None
}

/// Applies inline hints to `directory` and, first, to everything below it.
pub(crate) fn preprocess_layout_info(directory: &Directory, flags: TreeFlags) {
    let data = &directory.0;
    if data.preprocessed.get() {
        return;
    }
    debug!(menu = %data.name, "Processing inline hints");

    let defaults = data.default_layout_values.get();
    let mut strip_duplicates = false;
    let mut last_subdir = data.subdirs.borrow().last().cloned();

    let (info, using_default) = layout_info(directory);
    for item in info.iter().flatten() {
        let Some(last) = last_subdir.clone() else {
            break;
        };
        let LayoutItem::Menuname(name, values) = item else {
            continue;
        };
        let values = values.with_defaults(&defaults);
        let Some(subdir) = find_subdir(directory, name, &last, using_default) else {
            continue;
        };

        let (added, remove) = preprocess_subdir(directory, &subdir, &values, flags);
        strip_duplicates |= added;
        if remove {
            let subdir = subdir.as_item();
            let mut subdirs = data.subdirs.borrow_mut();
            if let Some(index) = position(&subdirs, &subdir) {
                if last.ptr_eq(&subdir) {
                    last_subdir = index.checked_sub(1).map(|prev| subdirs[prev].clone());
                }
                subdirs.remove(index);
            }
            subdir.set_parent(None);
        }
    }

    let mut index = 0;
    loop {
        let item = match data.subdirs.borrow().get(index) {
            Some(item) => item.clone(),
            None => break,
        };
        let TreeItem::Directory(subdir) = item else {
            index += 1;
            continue;
        };
        if subdir.0.preprocessed.get() {
            index += 1;
            continue;
        }

        let (added, remove) = preprocess_subdir(directory, &subdir, &defaults, flags);
        strip_duplicates |= added;
        if remove {
            data.subdirs.borrow_mut().remove(index);
            subdir.as_item().set_parent(None);
        } else {
            index += 1;
        }
    }

    if strip_duplicates {
        let mut entries = data.entries.borrow_mut();
        entries.sort_by(|a, b| a.entry_id().cmp(&b.entry_id()));
        entries.dedup_by(|later, earlier| later.entry_id() == earlier.entry_id());
    }

    data.preprocessed.set(true);
}

/// Applies `values` to `subdir`, a submenu of `directory`.
///
/// Returns whether items were added to `directory` and whether `subdir` has to be removed
/// from it.
fn preprocess_subdir(
    directory: &Directory,
    subdir: &Directory,
    values: &LayoutValues,
    flags: TreeFlags,
) -> (bool, bool) {
    preprocess_layout_info(subdir, flags);

    let sub = &subdir.0;
    if sub.subdirs.borrow().is_empty() && sub.entries.borrow().is_empty() {
        let remove = !flags.contains(TreeFlags::SHOW_EMPTY) && !values.show_empty;
        if remove {
            debug!(menu = %sub.name, "Not showing empty menu");
        }
        return (false, remove);
    }

    if !values.inline_menus {
        return (false, false);
    }

    let count = real_subdirs_len(subdir) + sub.entries.borrow().len();
    if values.inline_alias && count == 1 {
        let item = sub
            .subdirs
            .borrow()
            .first()
            .cloned()
            .or_else(|| sub.entries.borrow().first().cloned());
        let Some(item) = item else {
            return (false, false);
        };
        debug!(menu = %sub.name, "Inline aliasing menu to its only item");

        let alias = Alias::new(directory, subdir.clone(), item);
        for child in sub.subdirs.take().into_iter().chain(sub.entries.take()) {
            child.set_parent(None);
        }
        let target = match alias.item() {
            TreeItem::Directory(_) => &directory.0.subdirs,
            _ => &directory.0.entries,
        };
        target.borrow_mut().push(TreeItem::Alias(alias));
        return (true, true);
    }

    if values.inline_limit == 0 || values.inline_limit as usize >= count {
        if values.inline_header {
            debug!(menu = %sub.name, "Creating inline header");
            let limit = u16::try_from(values.inline_limit)
                .ok()
                .filter(|&limit| limit < u16::MAX)
                .unwrap_or(0);
            sub.will_inline_header.set(Some(limit));
            return (false, false);
        }

        debug!(menu = %sub.name, into = %directory.0.name, "Inlining menu contents");
        for (from, to) in [
            (&sub.subdirs, &directory.0.subdirs),
            (&sub.entries, &directory.0.entries),
        ] {
            let moved = from.take();
            for item in &moved {
                item.set_parent(Some(directory));
            }
            to.borrow_mut().extend(moved);
        }
        return (true, true);
    }

    (false, false)
}

/// Fills the contents of `directory` and everything below it from their layouts.
pub(crate) fn process_layout_info(directory: &Directory, flags: TreeFlags, sort_key: SortKey) {
    Arranger { flags, sort_key }.process(directory);
}

struct Arranger {
    flags: TreeFlags,
    sort_key: SortKey,
}

impl Arranger {
    fn process(&self, directory: &Directory) {
        let data = &directory.0;
        debug!(menu = %data.name, "Processing menu layout");

        for item in data.contents.take() {
            item.set_parent(None);
        }
        data.pending_separator.set(false);

        match layout_info(directory).0 {
            None => {
                self.merge_subdirs(directory, &[]);
                self.merge_entries(directory, &[]);
            }
            Some(info) => {
                for (index, item) in info.iter().enumerate() {
                    let rest = &info[index + 1..];
                    match item {
                        LayoutItem::Menuname(name, _) => self.merge_subdir_by_name(directory, name),
                        LayoutItem::Filename(id) => self.merge_entry_by_id(directory, id),
                        LayoutItem::Separator => self.separator(directory),
                        LayoutItem::Merge(MergeType::None) => {}
                        LayoutItem::Merge(MergeType::Menus) => {
                            self.merge_subdirs(directory, &menunames(rest))
                        }
                        LayoutItem::Merge(MergeType::Files) => {
                            self.merge_entries(directory, &filenames(rest))
                        }
                        LayoutItem::Merge(MergeType::All) => {
                            self.merge_all(directory, &menunames(rest), &filenames(rest))
                        }
                    }
                }
            }
        }

        data.subdirs.take();
        data.entries.take();
        data.default_layout_info.take();
        data.layout_info.take();
    }

    /// Separators never lead a menu and are only placed once something follows them.
    fn separator(&self, directory: &Directory) {
        let data = &directory.0;
        if self.flags.contains(TreeFlags::SHOW_ALL_SEPARATORS) {
            data.pending_separator.set(true);
            check_pending_separator(directory);
        } else if !data.contents.borrow().is_empty() {
            data.pending_separator.set(true);
        } else {
            debug!(menu = %data.name, "Skipping separator at the beginning of menu");
        }
    }

    fn merge_alias(&self, directory: &Directory, alias: Alias) {
        if let TreeItem::Directory(aliased) = alias.item() {
            self.process(aliased);
        }
        check_pending_separator(directory);
        directory.0.contents.borrow_mut().push(TreeItem::Alias(alias));
    }

    fn merge_subdir(&self, directory: &Directory, subdir: Directory) {
        self.process(&subdir);
        check_pending_separator(directory);

        let inline = match subdir.0.will_inline_header.get() {
            Some(0) => true,
            Some(limit) => subdir.0.contents.borrow().len() <= usize::from(limit),
            None => false,
        };
        if !inline {
            directory.0.contents.borrow_mut().push(subdir.as_item());
            return;
        }

        debug!(menu = %subdir.0.name, "Inlining menu under a header");
        let items = subdir.0.contents.take();
        subdir.0.will_inline_header.set(None);
        let header = Header::new(directory, subdir);
        let mut contents = directory.0.contents.borrow_mut();
        contents.push(TreeItem::Header(header));
        for item in items {
            item.set_parent(Some(directory));
            contents.push(item);
        }
    }

    fn merge_entry(&self, directory: &Directory, entry: TreeItem) {
        check_pending_separator(directory);
        directory.0.contents.borrow_mut().push(entry);
    }

    fn merge_subdir_by_name(&self, directory: &Directory, name: &str) {
        let (matched, rest): (Vec<TreeItem>, Vec<TreeItem>) = directory
            .0
            .subdirs
            .take()
            .into_iter()
            .partition(|item| matches!(item, TreeItem::Directory(d) if d.menu_id() == name));
        *directory.0.subdirs.borrow_mut() = rest;

        for item in matched {
            if let TreeItem::Directory(subdir) = item {
                self.merge_subdir(directory, subdir);
            }
        }
    }

    fn merge_entry_by_id(&self, directory: &Directory, id: &str) {
        let (matched, rest): (Vec<TreeItem>, Vec<TreeItem>) = directory
            .0
            .entries
            .take()
            .into_iter()
            .partition(|item| matches!(item, TreeItem::Entry(e) if e.desktop_file_id() == id));
        *directory.0.entries.borrow_mut() = rest;

        for entry in matched {
            self.merge_entry(directory, entry);
        }
    }

    fn merge_subdirs(&self, directory: &Directory, except: &[&str]) {
        let mut subdirs = directory.0.subdirs.take();
        subdirs.sort_by(|a, b| compare_items(a, b, SortKey::Name));

        for item in subdirs {
            match item {
                TreeItem::Alias(alias) => self.merge_alias(directory, alias),
                TreeItem::Directory(subdir) if !except.contains(&subdir.menu_id()) => {
                    self.merge_subdir(directory, subdir)
                }
                other => directory.0.subdirs.borrow_mut().push(other),
            }
        }
    }

    fn merge_entries(&self, directory: &Directory, except: &[&str]) {
        let mut entries = directory.0.entries.take();
        entries.sort_by(|a, b| compare_items(a, b, self.sort_key));

        for item in entries {
            match item {
                TreeItem::Alias(alias) => self.merge_alias(directory, alias),
                TreeItem::Entry(ref entry) if !except.contains(&entry.desktop_file_id()) => {
                    self.merge_entry(directory, item)
                }
                other => directory.0.entries.borrow_mut().push(other),
            }
        }
    }

    fn merge_all(&self, directory: &Directory, except_subdirs: &[&str], except_entries: &[&str]) {
        let mut items = directory.0.subdirs.take();
        items.extend(directory.0.entries.take());
        items.sort_by(|a, b| compare_items(a, b, self.sort_key));

        for item in items {
            match item {
                TreeItem::Alias(alias) => self.merge_alias(directory, alias),
                TreeItem::Directory(subdir) => {
                    if except_subdirs.contains(&subdir.menu_id()) {
                        directory.0.subdirs.borrow_mut().push(TreeItem::Directory(subdir));
                    } else {
                        self.merge_subdir(directory, subdir);
                    }
                }
                TreeItem::Entry(ref entry) => {
                    if except_entries.contains(&entry.desktop_file_id()) {
                        directory.0.entries.borrow_mut().push(item);
                    } else {
                        self.merge_entry(directory, item);
                    }
                }
                TreeItem::Separator(_) | TreeItem::Header(_) => {}
            }
        }
    }
}

fn check_pending_separator(directory: &Directory) {
    let data = &directory.0;
    if data.pending_separator.replace(false) {
        debug!(menu = %data.name, "Adding pending separator");
        data.contents
            .borrow_mut()
            .push(TreeItem::Separator(Separator::new(directory)));
    }
}

fn menunames(info: &[LayoutItem]) -> Vec<&str> {
    info.iter()
        .filter_map(|item| match item {
            LayoutItem::Menuname(name, _) => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

fn filenames(info: &[LayoutItem]) -> Vec<&str> {
    info.iter()
        .filter_map(|item| match item {
            LayoutItem::Filename(id) => Some(id.as_str()),
            _ => None,
        })
        .collect()
}
