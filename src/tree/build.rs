//! Building the directory tree from a resolved layout tree.
//!
//! Each `<Menu>` becomes a [`Directory`] whose entries are the pool entries matched by its
//! `<Include>` rules minus those matched by its `<Exclude>` rules. The pool is every
//! application visible through the menu's application directories.

// -- std imports
use std::rc::Rc;

// -- crate imports
use tracing::debug;

// -- module imports
use super::{
    TreeFlags,
    items::{Directory, Entry, LayoutItem, TreeItem},
};
use crate::{
    desktop_entries::DesktopEntrySet,
    entry_directories::EntryCache,
    layout::{LayoutTree, NodeId, NodeKind},
};

pub(crate) struct Builder<'a> {
    cache: &'a EntryCache,
    flags: TreeFlags,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(cache: &'a EntryCache, flags: TreeFlags) -> Self {
        Self { cache, flags }
    }

    /// Builds the root directory of the toplevel `menu`; `None` if the root is deleted.
    pub(crate) fn build(&self, layout: &LayoutTree, menu: NodeId) -> Option<Directory> {
        let mut allocated = DesktopEntrySet::new();
        let root = self.process_layout(layout, menu, None, &mut allocated)?;
        process_only_unallocated(&root, &allocated);
        Some(root)
    }

    fn process_layout(
        &self,
        layout: &LayoutTree,
        menu: NodeId,
        parent: Option<&Directory>,
        allocated: &mut DesktopEntrySet,
    ) -> Option<Directory> {
        let name = layout.menu_name(menu).unwrap_or_default();
        let directory = Directory::new(parent, name, parent.is_none());
        debug!(menu = name, "Processing menu layout");

        let pool: Rc<DesktopEntrySet> = self
            .cache
            .all_desktops(&layout.app_dirs(self.cache, menu));
        let track_excluded = self.flags.contains(TreeFlags::INCLUDE_EXCLUDED);

        let mut entries = DesktopEntrySet::new();
        let mut allocated_here = DesktopEntrySet::new();
        let mut excluded = DesktopEntrySet::new();
        let mut deleted = false;
        let mut subdirs: Vec<TreeItem> = Vec::new();

        for &child in layout.children(menu) {
            match layout.kind(child) {
                NodeKind::Menu(_) => {
                    if let Some(subdir) =
                        self.process_layout(layout, child, Some(&directory), allocated)
                    {
                        subdirs.insert(0, subdir.as_item());
                    }
                }
                NodeKind::Include => {
                    for &rule in layout.children(child) {
                        let matched = self.process_include_rules(layout, rule, &pool);
                        entries.union(&matched);
                        allocated_here.union(&matched);
                        if track_excluded {
                            excluded.subtract(&matched);
                        }
                    }
                }
                NodeKind::Exclude => {
                    for &rule in layout.children(child) {
                        let matched = self.process_include_rules(layout, rule, &pool);
                        if track_excluded {
                            excluded.union(&matched);
                        }
                        entries.subtract(&matched);
                    }
                }
                NodeKind::Directory => {
                    let found = layout.content(child).and_then(|relative| {
                        layout
                            .directory_dirs(self.cache, menu)
                            .get_directory(relative)
                    });
                    if let Some(entry) = found {
                        if !entry.hidden() {
                            *directory.0.directory_entry.borrow_mut() = Some(entry);
                        }
                    }
                }
                NodeKind::Deleted => deleted = true,
                NodeKind::NotDeleted => deleted = false,
                NodeKind::OnlyUnallocated => directory.0.only_unallocated.set(true),
                NodeKind::NotOnlyUnallocated => directory.0.only_unallocated.set(false),
                NodeKind::DefaultLayout(values) => {
                    directory.0.default_layout_values.set(*values);
                    *directory.0.default_layout_info.borrow_mut() =
                        collect_layout_info(layout, child);
                }
                NodeKind::Layout => {
                    *directory.0.layout_info.borrow_mut() = collect_layout_info(layout, child);
                }
                _ => {}
            }
        }

        if !directory.0.only_unallocated.get() {
            allocated.union(&allocated_here);
        }

        let directory_entry = directory.0.directory_entry.borrow().clone();
        if let Some(entry) = directory_entry {
            if entry.no_display() {
                directory.0.is_nodisplay.set(true);
                if !self.flags.contains(TreeFlags::INCLUDE_NODISPLAY) {
                    deleted = true;
                }
            }
            if !entry.show_in_environment() {
                deleted = true;
            }
        }

        if deleted {
            debug!(menu = name, "Menu is deleted");
            return None;
        }

        *directory.0.subdirs.borrow_mut() = subdirs;

        let mut items = Vec::with_capacity(entries.len() + excluded.len());
        for (id, entry) in entries.iter() {
            let item = Entry::new(&directory, entry.clone(), id, false, entry.no_display());
            items.push(TreeItem::Entry(item));
        }
        for (id, entry) in excluded.iter() {
            let item = Entry::new(&directory, entry.clone(), id, true, entry.no_display());
            items.push(TreeItem::Entry(item));
        }

        for subdir in directory.0.subdirs.borrow().iter() {
            if let TreeItem::Directory(subdir) = subdir {
                set_default_layout_values(&directory, subdir);
            }
        }

        let include_nodisplay = self.flags.contains(TreeFlags::INCLUDE_NODISPLAY);
        items.retain(|item| {
            let TreeItem::Entry(entry) = item else {
                return true;
            };
            let desktop = entry.desktop_entry();
            let keep = !desktop.hidden()
                && desktop.show_in_environment()
                && !desktop.tryexec_failed()
                && (include_nodisplay || !desktop.no_display());
            if !keep {
                item.set_parent(None);
            }
            keep
        });
        *directory.0.entries.borrow_mut() = items;

        Some(directory)
    }

    /// Entries of `pool` matched by the rule at `node`.
    fn process_include_rules(
        &self,
        layout: &LayoutTree,
        node: NodeId,
        pool: &DesktopEntrySet,
    ) -> DesktopEntrySet {
        match layout.kind(node) {
            NodeKind::And => {
                let mut set: Option<DesktopEntrySet> = None;
                for &child in layout.children(node) {
                    let matched = self.process_include_rules(layout, child, pool);
                    match &mut set {
                        Some(current) => current.intersection(&matched),
                        None => set = Some(matched),
                    }
                    if set.as_ref().is_some_and(DesktopEntrySet::is_empty) {
                        break;
                    }
                }
                set.unwrap_or_default()
            }
            NodeKind::Or => {
                let mut set = DesktopEntrySet::new();
                for &child in layout.children(node) {
                    set.union(&self.process_include_rules(layout, child, pool));
                }
                set
            }
            NodeKind::Not => {
                let mut matched = DesktopEntrySet::new();
                for &child in layout.children(node) {
                    matched.union(&self.process_include_rules(layout, child, pool));
                }
                let mut inverted = pool.clone();
                inverted.subtract(&matched);
                inverted
            }
            NodeKind::All => pool.clone(),
            NodeKind::Filename => {
                let mut set = DesktopEntrySet::new();
                if let Some(id) = layout.content(node) {
                    if let Some(entry) = pool.lookup(id) {
                        set.add_entry(entry.clone(), id);
                    }
                }
                set
            }
            NodeKind::Category => {
                let mut set = DesktopEntrySet::new();
                if let Some(name) = layout.content(node) {
                    let category = self.cache.loader().categories().intern(name);
                    for (id, entry) in pool.iter() {
                        if entry.has_category(&category) {
                            set.add_entry(entry.clone(), id);
                        }
                    }
                }
                set
            }
            _ => DesktopEntrySet::new(),
        }
    }
}

fn collect_layout_info(layout: &LayoutTree, node: NodeId) -> Vec<LayoutItem> {
    layout
        .children(node)
        .iter()
        .filter_map(|&child| match layout.kind(child) {
            NodeKind::Menuname(values) => layout
                .content(child)
                .map(|name| LayoutItem::Menuname(name.to_string(), *values)),
            NodeKind::Filename => layout
                .content(child)
                .map(|id| LayoutItem::Filename(id.to_string())),
            NodeKind::Separator => Some(LayoutItem::Separator),
            NodeKind::Merge(merge_type) => Some(LayoutItem::Merge(*merge_type)),
            _ => None,
        })
        .collect()
}

/// Drops, from every only-unallocated directory, the entries some other menu allocated.
fn process_only_unallocated(directory: &Directory, allocated: &DesktopEntrySet) {
    if directory.0.only_unallocated.get() {
        directory.0.entries.borrow_mut().retain(|item| {
            let claimed = item.entry_id().is_some_and(|id| allocated.contains(id));
            if claimed {
                item.set_parent(None);
            }
            !claimed
        });
    }

    let subdirs = directory.0.subdirs.borrow().clone();
    for subdir in subdirs {
        if let TreeItem::Directory(subdir) = subdir {
            process_only_unallocated(&subdir, allocated);
        }
    }
}

/// Hands the default layout values of `parent` down to descendants without their own.
fn set_default_layout_values(parent: &Directory, child: &Directory) {
    if !child.0.default_layout_info.borrow().is_empty()
        || !child.0.default_layout_values.get().mask.is_empty()
    {
        return;
    }
    child
        .0
        .default_layout_values
        .set(parent.0.default_layout_values.get());

    let subdirs = child.0.subdirs.borrow().clone();
    for subdir in subdirs {
        if let TreeItem::Directory(subdir) = subdir {
            set_default_layout_values(child, &subdir);
        }
    }
}
