//! Expansion of file-level directives.
//!
//! Merge files and merge directories are loaded and spliced in, default directory
//! directives are expanded into explicit ones, and legacy directories are turned into
//! synthetic `<Menu>` subtrees. Every path the result depends on is recorded so the owning
//! tree can watch it.

// -- std imports
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

// -- crate imports
use tracing::{debug, warn};

// -- module imports
use super::FileMonitorKind;
use crate::{
    desktop_entries::{DesktopEntrySet, EntryKind},
    entry_directories::{EntryCache, EntryDirectory},
    layout::{self, LayoutTree, MergeFileType, NodeId, NodeKind},
    linux_fs::{Environment, canonicalize},
};

pub(crate) struct Resolver<'a> {
    env: &'a Environment,
    cache: &'a EntryCache,
    /// Canonical paths of the files currently being merged.
    loading: HashSet<PathBuf>,
    monitors: Vec<(PathBuf, FileMonitorKind)>,
}

impl<'a> Resolver<'a> {
    /// Starts a resolution of the menu file at `canonical`.
    pub(crate) fn new(env: &'a Environment, cache: &'a EntryCache, canonical: &Path) -> Self {
        Self {
            env,
            cache,
            loading: HashSet::from([canonical.to_path_buf()]),
            monitors: Vec::new(),
        }
    }

    /// Paths to watch, in the order they were consulted.
    pub(crate) fn into_monitors(self) -> Vec<(PathBuf, FileMonitorKind)> {
        self.monitors
    }

    pub(crate) fn resolve_files(&mut self, tree: &mut LayoutTree, node: NodeId) {
        match tree.kind(node) {
            NodeKind::MergeFile(merge_type) => {
                let merge_type = *merge_type;
                self.resolve_merge_file(tree, node, merge_type);
            }
            NodeKind::MergeDir => {
                if let Some(path) = tree.content_as_path(node) {
                    self.load_merge_dir(tree, &path, node);
                }
                tree.unlink(node);
            }
            NodeKind::DefaultAppDirs => {
                self.resolve_default_dirs(tree, node, NodeKind::AppDir, "applications");
            }
            NodeKind::DefaultDirectoryDirs => {
                self.resolve_default_dirs(
                    tree,
                    node,
                    NodeKind::DirectoryDir,
                    "desktop-directories",
                );
            }
            NodeKind::DefaultMergeDirs => self.resolve_default_merge_dirs(tree, node),
            NodeKind::LegacyDir { .. } => self.resolve_legacy_dir(tree, node),
            NodeKind::KdeLegacyDirs => self.resolve_kde_legacy_dirs(tree, node),
            NodeKind::Passthrough => tree.unlink(node),
            _ => {
                let children = tree.children(node).to_vec();
                for child in children {
                    self.resolve_files(tree, child);
                }
            }
        }
    }

    fn resolve_merge_file(&mut self, tree: &mut LayoutTree, node: NodeId, kind: MergeFileType) {
        let merged = kind == MergeFileType::Parent && self.load_parent_merge_file(tree, node);
        if !merged {
            if let Some(path) = tree.content_as_path(node) {
                self.load_merge_file(tree, &path, false, true, node);
            }
        }
        tree.unlink(node);
    }

    /// Splices the toplevel `<Menu>` children of `from` after `after`, resolving them first.
    fn merge_resolved_children(
        &mut self,
        tree: &mut LayoutTree,
        after: NodeId,
        mut from: LayoutTree,
    ) {
        let from_root = from.root();
        self.resolve_files(&mut from, from_root);

        let Some(menu) = from.find_menu_child(from_root) else {
            return;
        };
        let mut insert_after = after;
        for &child in from.children(menu) {
            if matches!(from.kind(child), NodeKind::Name) {
                continue;
            }
            let copy = tree.graft(&from, child);
            tree.insert_after(insert_after, copy);
            insert_after = copy;
        }
    }

    /// Returns `false` when the file could not be merged; a recursive merge counts as merged.
    fn load_merge_file(
        &mut self,
        tree: &mut LayoutTree,
        filename: &Path,
        is_canonical: bool,
        add_monitor: bool,
        after: NodeId,
    ) -> bool {
        let canonical = if is_canonical {
            filename.to_path_buf()
        } else {
            match canonicalize(filename) {
                Some(canonical) => canonical,
                None => {
                    if add_monitor {
                        self.monitors
                            .push((filename.to_path_buf(), FileMonitorKind::NonexistentFile));
                    }
                    debug!(file = %filename.display(), "Merge file does not exist");
                    return false;
                }
            }
        };

        if self.loading.contains(&canonical) {
            warn!(
                file = %canonical.display(),
                "Not loading merge file, it would cause a recursive loop"
            );
            return true;
        }

        debug!(file = %canonical.display(), "Merging file");
        let from = match layout::load(&canonical, None) {
            Ok(from) => from,
            Err(e) => {
                warn!(error = %e, "Could not load merge file");
                return false;
            }
        };

        self.loading.insert(canonical.clone());
        if add_monitor {
            self.monitors.push((canonical.clone(), FileMonitorKind::File));
        }
        self.merge_resolved_children(tree, after, from);
        self.loading.remove(&canonical);
        true
    }

    /// `<MergeFile type="parent">`: the same file from the next less specific config dir.
    fn load_parent_merge_file(&mut self, tree: &mut LayoutTree, node: NodeId) -> bool {
        let (Some(basedir), Some(name)) = (tree.basedir(), tree.name()) else {
            return false;
        };
        let Some(canonical_basedir) = canonicalize(basedir) else {
            return false;
        };
        let menu_file = format!("{name}.menu");

        for candidate in self.env.menu_file_candidates(&menu_file) {
            if self.load_parent_from_basename(tree, node, &candidate, &canonical_basedir) {
                return true;
            }
        }
        false
    }

    fn load_parent_from_basename(
        &mut self,
        tree: &mut LayoutTree,
        node: NodeId,
        menu_file: &str,
        canonical_basedir: &Path,
    ) -> bool {
        let env = self.env;
        let mut found_basedir = env
            .user_config_dir
            .as_deref()
            .is_some_and(|dir| is_menus_dir_of(canonical_basedir, dir));

        for config_dir in &env.system_config_dirs {
            if !found_basedir {
                found_basedir = is_menus_dir_of(canonical_basedir, config_dir);
                continue;
            }
            let path = config_dir.join("menus").join(menu_file);
            debug!(file = %path.display(), "Trying parent merge file");
            if self.load_merge_file(tree, &path, false, true, node) {
                return true;
            }
        }
        false
    }

    fn load_merge_dir(&mut self, tree: &mut LayoutTree, dirname: &Path, after: NodeId) {
        debug!(dir = %dirname.display(), "Loading merge dir");
        self.monitors
            .push((dirname.to_path_buf(), FileMonitorKind::Directory));

        let read = match fs::read_dir(dirname) {
            Ok(read) => read,
            Err(e) => {
                debug!(dir = %dirname.display(), error = %e, "Could not read merge dir");
                return;
            }
        };
        let mut files: Vec<PathBuf> = read
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "menu"))
            .collect();
        files.sort();

        for file in files {
            self.load_merge_file(tree, &file, true, false, after);
        }
    }

    /// One `kind` node per data dir, user dir last so it ends up with the highest priority.
    fn resolve_default_dirs(
        &mut self,
        tree: &mut LayoutTree,
        node: NodeId,
        kind: NodeKind,
        subdir: &str,
    ) {
        let mut before = node;
        for data_dir in self.env.data_dirs() {
            let content = data_dir.join(subdir).to_string_lossy().into_owned();
            let new = tree.new_node(kind.duplicate(), Some(content));
            tree.insert_before(before, new);
            before = new;
        }
        tree.unlink(node);
    }

    fn resolve_default_merge_dirs(&mut self, tree: &mut LayoutTree, node: NodeId) {
        let Some(name) = tree.name() else {
            tree.unlink(node);
            return;
        };
        let merged = format!("{name}-merged");

        let mut dirs: Vec<PathBuf> = self
            .env
            .system_config_dirs
            .iter()
            .rev()
            .map(|dir| dir.join("menus").join(&merged))
            .collect();
        if let Some(user) = &self.env.user_config_dir {
            dirs.push(user.join("menus").join(&merged));
        }
        for dir in dirs {
            self.load_merge_dir(tree, &dir, node);
        }
        tree.unlink(node);
    }

    /// The `<LegacyDir>` stays in place; it also feeds the menu's directory lists.
    fn resolve_legacy_dir(&mut self, tree: &mut LayoutTree, node: NodeId) {
        let NodeKind::LegacyDir { prefix } = tree.kind(node) else {
            return;
        };
        let prefix = prefix.clone();
        let Some(menu_name) = tree
            .parent(node)
            .and_then(|parent| tree.menu_name(parent))
            .map(str::to_string)
        else {
            return;
        };
        let Some(legacy_dir) = tree.content_as_path(node) else {
            return;
        };

        let mut synthesized = LayoutTree::new(None, None);
        let root = synthesized.root();
        if self.add_menu_for_legacy_dir(
            &mut synthesized,
            root,
            &legacy_dir,
            None,
            prefix.as_deref(),
            &menu_name,
        ) {
            self.merge_resolved_children(tree, node, synthesized);
        }
    }

    fn add_menu_for_legacy_dir(
        &self,
        tree: &mut LayoutTree,
        parent: NodeId,
        legacy_dir: &Path,
        relative: Option<&str>,
        prefix: Option<&str>,
        menu_name: &str,
    ) -> bool {
        let Some(directory) =
            EntryDirectory::new_legacy(self.cache, EntryKind::Application, legacy_dir, prefix)
        else {
            return false;
        };

        let mut desktops = DesktopEntrySet::new();
        let mut directories = DesktopEntrySet::new();
        let mut subdirs = Vec::new();
        directory.get_flat_contents(
            Some(&mut desktops),
            Some(&mut directories),
            Some(&mut subdirs),
        );
        drop(directory);

        if desktops.is_empty() && subdirs.is_empty() {
            return false;
        }
        debug!(dir = %legacy_dir.display(), menu = menu_name, "Synthesizing legacy menu");

        let menu = tree.new_node(NodeKind::menu(), None);
        tree.append_child(parent, menu);
        let name = tree.new_node(NodeKind::Name, Some(menu_name.to_string()));
        tree.append_child(menu, name);

        if directories.contains(".directory") {
            let file = match relative {
                Some(relative) => format!("{relative}/.directory"),
                None => ".directory".to_string(),
            };
            let node = tree.new_node(NodeKind::Directory, Some(file));
            tree.append_child(menu, node);
        }

        if !desktops.is_empty() {
            let include = tree.new_node(NodeKind::Include, None);
            tree.append_child(menu, include);
            for (id, entry) in desktops.iter() {
                if entry.has_categories() {
                    continue;
                }
                let filename = tree.new_node(NodeKind::Filename, Some(id.to_string()));
                tree.append_child(include, filename);
            }
        }

        for subdir in &subdirs {
            let subdir_relative = match relative {
                Some(relative) => format!("{relative}/{subdir}"),
                None => subdir.clone(),
            };
            self.add_menu_for_legacy_dir(
                tree,
                menu,
                &legacy_dir.join(subdir),
                Some(&subdir_relative),
                prefix,
                subdir,
            );
        }
        true
    }

    fn resolve_kde_legacy_dirs(&mut self, tree: &mut LayoutTree, node: NodeId) {
        let legacy_dirs: Vec<String> = self
            .env
            .data_dirs()
            .map(|dir| dir.join("applnk").to_string_lossy().into_owned())
            .collect();

        let mut before = node;
        for legacy_dir in legacy_dirs {
            let legacy = tree.new_node(
                NodeKind::LegacyDir {
                    prefix: Some("kde".to_string()),
                },
                Some(legacy_dir),
            );
            tree.insert_before(before, legacy);
            self.resolve_legacy_dir(tree, legacy);
            before = legacy;
        }
        tree.unlink(node);
    }
}

/// Whether `canonical_basedir` is the `menus` directory of `config_dir`.
fn is_menus_dir_of(canonical_basedir: &Path, config_dir: &Path) -> bool {
    canonicalize(&config_dir.join("menus")).is_some_and(|dir| dir == canonical_basedir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        desktop_entries::EntryLoader,
        monitor::{ManualWatchService, WatchHub},
    };
    use std::rc::Rc;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn cache() -> Rc<EntryCache> {
        let hub = WatchHub::new(Box::new(ManualWatchService::new()));
        EntryCache::new(hub, EntryLoader::new("MATE", ""))
    }

    fn resolve(
        env: &Environment,
        cache: &EntryCache,
        file: &Path,
    ) -> (LayoutTree, Vec<(PathBuf, FileMonitorKind)>) {
        let canonical = canonicalize(file).unwrap();
        let mut tree = layout::load(&canonical, None).unwrap();
        let mut resolver = Resolver::new(env, cache, &canonical);
        let root = tree.root();
        resolver.resolve_files(&mut tree, root);
        (tree, resolver.into_monitors())
    }

    fn toplevel(tree: &LayoutTree) -> String {
        let menu = tree.find_menu_child(tree.root()).unwrap();
        tree.outline(menu)
    }

    #[test]
    fn test_merge_file_splices_children() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        write(
            &dir.join("main.menu"),
            "<Menu><Name>Main</Name><MergeFile>extra.menu</MergeFile><AppDir>/a</AppDir></Menu>",
        );
        write(
            &dir.join("extra.menu"),
            "<Menu><Name>Ignored</Name><AppDir>apps</AppDir><Menu><Name>Sub</Name></Menu></Menu>",
        );
        let cache = cache();
        let (tree, monitors) = resolve(&Environment::default(), &cache, &dir.join("main.menu"));

        let apps = dir.join("apps");
        assert_eq!(
            toplevel(&tree),
            format!(
                "Menu[Name(Main) AppDir({}) Menu[Name(Sub)] AppDir(/a)]",
                apps.display()
            )
        );
        assert_eq!(monitors, vec![(dir.join("extra.menu"), FileMonitorKind::File)]);
    }

    #[test]
    fn test_missing_merge_file_is_watched() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        write(
            &dir.join("main.menu"),
            "<Menu><Name>Main</Name><MergeFile>gone.menu</MergeFile></Menu>",
        );
        let cache = cache();
        let (tree, monitors) = resolve(&Environment::default(), &cache, &dir.join("main.menu"));

        assert_eq!(toplevel(&tree), "Menu[Name(Main)]");
        assert_eq!(
            monitors,
            vec![(dir.join("gone.menu"), FileMonitorKind::NonexistentFile)]
        );
    }

    #[test]
    fn test_recursive_merge_is_cut() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        write(
            &dir.join("a.menu"),
            "<Menu><Name>A</Name><MergeFile>b.menu</MergeFile><AppDir>/from-a</AppDir></Menu>",
        );
        write(
            &dir.join("b.menu"),
            "<Menu><Name>B</Name><MergeFile>a.menu</MergeFile><AppDir>/from-b</AppDir></Menu>",
        );
        let cache = cache();
        let (tree, _) = resolve(&Environment::default(), &cache, &dir.join("a.menu"));

        assert_eq!(
            toplevel(&tree),
            "Menu[Name(A) AppDir(/from-b) AppDir(/from-a)]"
        );
    }

    #[test]
    fn test_default_dirs_expand_user_last() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        write(
            &dir.join("main.menu"),
            "<Menu><Name>Main</Name><DefaultAppDirs/><DefaultDirectoryDirs/></Menu>",
        );
        let env = Environment {
            user_data_dir: Some(PathBuf::from("/home/u/.local/share")),
            system_data_dirs: vec![PathBuf::from("/usr/local/share"), PathBuf::from("/usr/share")],
            ..Environment::default()
        };
        let cache = cache();
        let (tree, _) = resolve(&env, &cache, &dir.join("main.menu"));

        assert_eq!(
            toplevel(&tree),
            "Menu[Name(Main) \
             AppDir(/usr/share/applications) \
             AppDir(/usr/local/share/applications) \
             AppDir(/home/u/.local/share/applications) \
             DirectoryDir(/usr/share/desktop-directories) \
             DirectoryDir(/usr/local/share/desktop-directories) \
             DirectoryDir(/home/u/.local/share/desktop-directories)]"
        );
    }

    #[test]
    fn test_merge_dir_and_default_merge_dirs() {
        let tmp = TempDir::new().unwrap();
        let root = canonicalize(tmp.path()).unwrap();
        let system = root.join("etc/xdg");
        let user = root.join("home/.config");
        write(
            &system.join("menus/applications.menu"),
            "<Menu><Name>Applications</Name><DefaultMergeDirs/></Menu>",
        );
        write(
            &system.join("menus/applications-merged/one.menu"),
            "<Menu><Name>X</Name><AppDir>/system</AppDir></Menu>",
        );
        write(
            &user.join("menus/applications-merged/two.menu"),
            "<Menu><Name>X</Name><AppDir>/user</AppDir></Menu>",
        );
        write(&user.join("menus/applications-merged/notes.txt"), "ignored");
        let env = Environment {
            user_config_dir: Some(user.clone()),
            system_config_dirs: vec![system.clone()],
            ..Environment::default()
        };
        let cache = cache();
        let (tree, monitors) = resolve(&env, &cache, &system.join("menus/applications.menu"));

        assert_eq!(
            toplevel(&tree),
            "Menu[Name(Applications) AppDir(/user) AppDir(/system)]"
        );
        assert_eq!(
            monitors,
            vec![
                (system.join("menus/applications-merged"), FileMonitorKind::Directory),
                (user.join("menus/applications-merged"), FileMonitorKind::Directory),
            ]
        );
    }

    #[test]
    fn test_parent_merge_file_skips_to_next_config_dir() {
        let tmp = TempDir::new().unwrap();
        let root = canonicalize(tmp.path()).unwrap();
        let user = root.join("user");
        let first = root.join("first");
        let second = root.join("second");
        write(
            &user.join("menus/applications.menu"),
            "<Menu><Name>Applications</Name><MergeFile type=\"parent\"/><AppDir>/user</AppDir></Menu>",
        );
        write(
            &first.join("menus/applications.menu"),
            "<Menu><Name>Applications</Name><AppDir>/first</AppDir></Menu>",
        );
        write(
            &second.join("menus/applications.menu"),
            "<Menu><Name>Applications</Name><AppDir>/second</AppDir></Menu>",
        );
        let env = Environment {
            user_config_dir: Some(user.clone()),
            system_config_dirs: vec![first.clone(), second.clone()],
            ..Environment::default()
        };
        let cache = cache();

        let (tree, _) = resolve(&env, &cache, &first.join("menus/applications.menu"));
        assert_eq!(toplevel(&tree), "Menu[Name(Applications) AppDir(/first)]");

        write(
            &first.join("menus/applications.menu"),
            "<Menu><Name>Applications</Name><MergeFile type=\"parent\"/><AppDir>/first</AppDir></Menu>",
        );
        let (tree, _) = resolve(&env, &cache, &first.join("menus/applications.menu"));
        assert_eq!(
            toplevel(&tree),
            "Menu[Name(Applications) AppDir(/second) AppDir(/first)]"
        );
    }

    #[test]
    fn test_legacy_dir_synthesizes_menus() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        let legacy = dir.join("legacy");
        write(
            &legacy.join("old.desktop"),
            "[Desktop Entry]\nType=Application\nName=Old\nExec=old\n",
        );
        write(
            &legacy.join("typed.desktop"),
            "[Desktop Entry]\nType=Application\nName=Typed\nExec=typed\nCategories=Office;\n",
        );
        write(
            &legacy.join("Games/.directory"),
            "[Desktop Entry]\nType=Directory\nName=Games\n",
        );
        write(
            &legacy.join("Games/pong.desktop"),
            "[Desktop Entry]\nType=Application\nName=Pong\nExec=pong\n",
        );
        write(
            &dir.join("main.menu"),
            "<Menu><Name>Main</Name><LegacyDir prefix=\"kde\">legacy</LegacyDir></Menu>",
        );
        let cache = cache();
        let (tree, _) = resolve(&Environment::default(), &cache, &dir.join("main.menu"));

        assert_eq!(
            toplevel(&tree),
            "Menu[Name(Main) LegacyDir(legacy) \
             Include[Filename(kde-old.desktop)] \
             Menu[Name(Games) Directory(Games/.directory) Include[Filename(kde-pong.desktop)]]]"
        );
    }

    #[test]
    fn test_kde_legacy_dirs_expand_system_first() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        let user = dir.join("user");
        let system = dir.join("sys");
        write(
            &user.join("applnk/u.desktop"),
            "[Desktop Entry]\nType=Application\nName=U\nExec=u\n",
        );
        write(
            &system.join("applnk/s.desktop"),
            "[Desktop Entry]\nType=Application\nName=S\nExec=s\n",
        );
        write(
            &dir.join("main.menu"),
            "<Menu><Name>Main</Name><KDELegacyDirs/><AppDir>/x</AppDir></Menu>",
        );
        let env = Environment {
            user_data_dir: Some(user.clone()),
            system_data_dirs: vec![system.clone()],
            ..Environment::default()
        };
        let cache = cache();
        let (tree, _) = resolve(&env, &cache, &dir.join("main.menu"));

        let outline = toplevel(&tree);
        assert_eq!(
            outline,
            format!(
                "Menu[Name(Main) \
                 LegacyDir({}) Include[Filename(kde-s.desktop)] \
                 LegacyDir({}) Include[Filename(kde-u.desktop)] \
                 AppDir(/x)]",
                system.join("applnk").display(),
                user.join("applnk").display()
            )
        );
        assert!(!outline.contains("KDELegacyDirs"));
    }

    #[test]
    fn test_passthrough_removed() {
        let tmp = TempDir::new().unwrap();
        let dir = canonicalize(tmp.path()).unwrap();
        write(
            &dir.join("main.menu"),
            "<Menu><!-- note --><Name>Main</Name></Menu>",
        );
        let cache = cache();
        let (tree, _) = resolve(&Environment::default(), &cache, &dir.join("main.menu"));
        assert_eq!(toplevel(&tree), "Menu[Name(Main)]");
    }
}
