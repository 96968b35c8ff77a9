//! Desktop entries and id-keyed entry sets.
//!
//! A [`DesktopEntry`] is an immutable, shared view on one `.desktop` or `.directory` file.
//! Reloading produces a fresh entry for the same path which replaces the old one wherever it
//! is cached. [`DesktopEntrySet`] maps desktop file ids to entries and provides the set algebra
//! used by `<Include>`/`<Exclude>` evaluation.

// -- std imports
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    rc::Rc,
};

// -- crate imports
use bitflags::bitflags;
use tracing::debug;

// -- module imports
use crate::{
    check,
    desktop::{Group, KeyFile},
};

/// Suffix of application entries.
pub const DESKTOP_SUFFIX: &str = ".desktop";

/// Suffix of directory entries.
pub const DIRECTORY_SUFFIX: &str = ".directory";

/// Category given to legacy entries that carry none.
pub const LEGACY_CATEGORY: &str = "Legacy";

const MAIN_GROUP: &str = "Desktop Entry";
const KDE_MAIN_GROUP: &str = "KDE Desktop Entry";

/// What a desktop entry file describes, fixed by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A `.desktop` file with `Type=Application`.
    Application,
    /// A `.directory` file with `Type=Directory`.
    Directory,
}

impl EntryKind {
    /// Classify a file name by suffix.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(DESKTOP_SUFFIX) {
            Some(Self::Application)
        } else if name.ends_with(DIRECTORY_SUFFIX) {
            Some(Self::Directory)
        } else {
            None
        }
    }

    fn type_key(self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::Directory => "Directory",
        }
    }
}

/// An interned category name.
///
/// Two categories are equal exactly when they come from the same [`CategoryInterner`]
/// slot, which makes comparison a pointer check.
#[derive(Clone)]
pub struct Category(Rc<str>);

impl Category {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Category {}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// String table for [`Category`] values.
#[derive(Debug, Default)]
pub struct CategoryInterner {
    table: RefCell<HashSet<Rc<str>>>,
}

impl CategoryInterner {
    /// Returns the unique category for `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> Category {
        let mut table = self.table.borrow_mut();
        if let Some(existing) = table.get(name) {
            return Category(Rc::clone(existing));
        }
        let fresh: Rc<str> = Rc::from(name);
        table.insert(Rc::clone(&fresh));
        Category(fresh)
    }
}

bitflags! {
    /// Visibility flags derived from a desktop entry file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u8 {
        /// `NoDisplay=true`.
        const NO_DISPLAY = 1 << 0;
        /// `Hidden=true`.
        const HIDDEN = 1 << 1;
        /// Shown in the configured desktop environment (`OnlyShowIn`/`NotShowIn`).
        const SHOW_IN_ENVIRONMENT = 1 << 2;
        /// `TryExec` names a program that cannot be found.
        const TRYEXEC_FAILED = 1 << 3;
    }
}

/// Everything needed to turn a file into a [`DesktopEntry`].
#[derive(Debug)]
pub struct EntryLoader {
    desktop_name: String,
    path_env: String,
    categories: CategoryInterner,
}

impl EntryLoader {
    /// Creates a loader evaluating `OnlyShowIn`/`NotShowIn` against `desktop_name` and
    /// resolving `TryExec` through `path_env`.
    pub fn new(desktop_name: impl Into<String>, path_env: impl Into<String>) -> Self {
        Self {
            desktop_name: desktop_name.into(),
            path_env: path_env.into(),
            categories: CategoryInterner::default(),
        }
    }

    pub fn categories(&self) -> &CategoryInterner {
        &self.categories
    }

    /// Loads the entry at `path`.
    ///
    /// Returns `None` when the suffix is unknown, the file cannot be read, or required keys
    /// are missing or inconsistent with the suffix.
    pub fn load(&self, path: &Path) -> Option<DesktopEntry> {
        let basename = path.file_name()?.to_str()?.to_string();
        let kind = EntryKind::from_file_name(&basename)?;

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(file = %path.display(), error = %e, "Could not read desktop entry");
                return None;
            }
        };

        self.parse(path, basename, kind, &content)
    }

    fn parse(
        &self,
        path: &Path,
        basename: String,
        kind: EntryKind,
        content: &str,
    ) -> Option<DesktopEntry> {
        let kf = KeyFile::parse(content);
        let Some(group) = kf.group(MAIN_GROUP).or_else(|| kf.group(KDE_MAIN_GROUP)) else {
            debug!(file = %path.display(), "Invalid desktop file: missing main group");
            return None;
        };

        let type_value = group.string("Type");
        if type_value.as_deref() != Some(kind.type_key()) {
            debug!(
                file = %path.display(),
                found = ?type_value,
                expected = kind.type_key(),
                "Invalid desktop file: wrong or missing Type"
            );
            return None;
        }

        let Some(name) = group.string("Name").filter(|n| !n.is_empty()) else {
            debug!(file = %path.display(), "Invalid desktop file: missing Name");
            return None;
        };

        let (exec, terminal) = match kind {
            EntryKind::Application => {
                let Some(exec) = group.string("Exec") else {
                    debug!(file = %path.display(), "Invalid desktop file: missing Exec");
                    return None;
                };
                (Some(exec), group.boolean("Terminal"))
            }
            EntryKind::Directory => (None, false),
        };

        let categories = group
            .string_list("Categories")
            .unwrap_or_default()
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| self.categories.intern(c))
            .collect();

        let mut flags = EntryFlags::empty();
        flags.set(EntryFlags::NO_DISPLAY, group.boolean("NoDisplay"));
        flags.set(EntryFlags::HIDDEN, group.boolean("Hidden"));
        flags.set(EntryFlags::SHOW_IN_ENVIRONMENT, self.shown_in_environment(group));

        if let Some(try_exec) = group.string("TryExec") {
            if check::resolve_executable(&try_exec, &self.path_env).is_none() {
                debug!(file = %path.display(), try_exec, "TryExec program not found");
                flags |= EntryFlags::TRYEXEC_FAILED;
            }
        }

        let full_name = group
            .string("X-MATE-FullName")
            .or_else(|| group.string("X-GNOME-FullName"));

        Some(DesktopEntry(Rc::new(EntryData {
            path: path.to_path_buf(),
            basename,
            kind,
            name,
            generic_name: group.string("GenericName"),
            full_name,
            comment: group.string("Comment"),
            icon: group.string("Icon"),
            exec,
            terminal,
            categories,
            flags,
        })))
    }

    fn shown_in_environment(&self, group: Group<'_>) -> bool {
        if let Some(only) = group.string_list("OnlyShowIn") {
            return only.iter().any(|d| *d == self.desktop_name);
        }
        if let Some(not) = group.string_list("NotShowIn") {
            return !not.iter().any(|d| *d == self.desktop_name);
        }
        true
    }
}

#[derive(Debug, Clone)]
struct EntryData {
    path: PathBuf,
    basename: String,
    kind: EntryKind,
    name: String,
    generic_name: Option<String>,
    full_name: Option<String>,
    comment: Option<String>,
    icon: Option<String>,
    exec: Option<String>,
    terminal: bool,
    categories: Vec<Category>,
    flags: EntryFlags,
}

/// A loaded `.desktop` or `.directory` file.
///
/// Cloning shares the entry; [`DesktopEntry::copy`] creates a distinct one.
#[derive(Clone)]
pub struct DesktopEntry(Rc<EntryData>);

impl fmt::Debug for DesktopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesktopEntry")
            .field("path", &self.0.path)
            .field("kind", &self.0.kind)
            .field("name", &self.0.name)
            .finish()
    }
}

impl DesktopEntry {
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    pub fn basename(&self) -> &str {
        &self.0.basename
    }

    pub fn kind(&self) -> EntryKind {
        self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn generic_name(&self) -> Option<&str> {
        self.0.generic_name.as_deref()
    }

    pub fn full_name(&self) -> Option<&str> {
        self.0.full_name.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.0.comment.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.0.icon.as_deref()
    }

    pub fn exec(&self) -> Option<&str> {
        self.0.exec.as_deref()
    }

    pub fn launch_in_terminal(&self) -> bool {
        self.0.terminal
    }

    pub fn categories(&self) -> &[Category] {
        &self.0.categories
    }

    pub fn flags(&self) -> EntryFlags {
        self.0.flags
    }

    pub fn no_display(&self) -> bool {
        self.0.flags.contains(EntryFlags::NO_DISPLAY)
    }

    pub fn hidden(&self) -> bool {
        self.0.flags.contains(EntryFlags::HIDDEN)
    }

    pub fn show_in_environment(&self) -> bool {
        self.0.flags.contains(EntryFlags::SHOW_IN_ENVIRONMENT)
    }

    pub fn tryexec_failed(&self) -> bool {
        self.0.flags.contains(EntryFlags::TRYEXEC_FAILED)
    }

    pub fn has_categories(&self) -> bool {
        !self.0.categories.is_empty()
    }

    pub fn has_category(&self, category: &Category) -> bool {
        self.0.categories.iter().any(|c| c == category)
    }

    /// Re-reads the backing file.
    ///
    /// Returns the refreshed entry, or `None` when the file no longer loads. The receiver is
    /// left untouched; callers swap the result in wherever the old entry was stored.
    pub fn reload(&self, loader: &EntryLoader) -> Option<DesktopEntry> {
        loader.load(&self.0.path)
    }

    /// A value copy with its own identity.
    pub fn copy(&self) -> DesktopEntry {
        DesktopEntry(Rc::new((*self.0).clone()))
    }

    /// A copy carrying the synthetic `Legacy` category in addition to its own.
    pub fn with_legacy_category(&self, categories: &CategoryInterner) -> DesktopEntry {
        let mut data = (*self.0).clone();
        data.categories.push(categories.intern(LEGACY_CATEGORY));
        DesktopEntry(Rc::new(data))
    }

    /// Whether both handles refer to the same loaded entry.
    pub fn ptr_eq(&self, other: &DesktopEntry) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A mapping from desktop file id to entry.
///
/// Iteration follows id order, though no caller may depend on it.
#[derive(Debug, Clone, Default)]
pub struct DesktopEntrySet {
    entries: BTreeMap<String, DesktopEntry>,
}

impl DesktopEntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `id` to `entry`, replacing any previous mapping.
    pub fn add_entry(&mut self, entry: DesktopEntry, id: impl Into<String>) {
        self.entries.insert(id.into(), entry);
    }

    pub fn lookup(&self, id: &str) -> Option<&DesktopEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds every mapping of `other`; entries of `other` win on shared ids.
    pub fn union(&mut self, other: &DesktopEntrySet) {
        for (id, entry) in &other.entries {
            self.entries.insert(id.clone(), entry.clone());
        }
    }

    /// Keeps only the ids also present in `other`.
    pub fn intersection(&mut self, other: &DesktopEntrySet) {
        if other.is_empty() {
            self.entries.clear();
            return;
        }
        self.entries.retain(|id, _| other.entries.contains_key(id));
    }

    /// Removes every id present in `other`.
    pub fn subtract(&mut self, other: &DesktopEntrySet) {
        if self.is_empty() {
            return;
        }
        for id in other.entries.keys() {
            self.entries.remove(id);
        }
    }

    pub fn swap_contents(&mut self, other: &mut DesktopEntrySet) {
        std::mem::swap(&mut self.entries, &mut other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DesktopEntry)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), e))
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &DesktopEntry)) {
        for (id, entry) in &self.entries {
            f(id, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn loader() -> EntryLoader {
        EntryLoader::new("MATE", "")
    }

    fn app(loader: &EntryLoader, dir: &Path, name: &str) -> DesktopEntry {
        let path = write(
            dir,
            name,
            "[Desktop Entry]\nType=Application\nName=App\nExec=app\n",
        );
        loader.load(&path).unwrap()
    }

    fn set_of(entries: &[(&str, &DesktopEntry)]) -> DesktopEntrySet {
        let mut set = DesktopEntrySet::new();
        for (id, e) in entries {
            set.add_entry((*e).clone(), *id);
        }
        set
    }

    fn ids(set: &DesktopEntrySet) -> Vec<&str> {
        set.iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_load_application_reads_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "editor.desktop",
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=Editor\n\
             GenericName=Text Editor\n\
             X-MATE-FullName=Pluma Text Editor\n\
             Comment=Edit files\n\
             Icon=accessories-text-editor\n\
             Exec=pluma %U\n\
             Terminal=true\n\
             Categories=Utility;TextEditor;\n",
        );
        let loader = loader();
        let entry = loader.load(&path).unwrap();

        assert_eq!(entry.kind(), EntryKind::Application);
        assert_eq!(entry.basename(), "editor.desktop");
        assert_eq!(entry.name(), "Editor");
        assert_eq!(entry.generic_name(), Some("Text Editor"));
        assert_eq!(entry.full_name(), Some("Pluma Text Editor"));
        assert_eq!(entry.comment(), Some("Edit files"));
        assert_eq!(entry.icon(), Some("accessories-text-editor"));
        assert_eq!(entry.exec(), Some("pluma %U"));
        assert!(entry.launch_in_terminal());
        assert!(entry.has_category(&loader.categories().intern("Utility")));
        assert!(entry.has_category(&loader.categories().intern("TextEditor")));
        assert!(!entry.has_category(&loader.categories().intern("Game")));
        assert!(entry.show_in_environment());
        assert!(!entry.no_display() && !entry.hidden() && !entry.tryexec_failed());
    }

    #[test]
    fn test_load_rejects_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let cases = [
            ("no-group.desktop", "[Other]\nType=Application\nName=A\nExec=a\n"),
            ("no-name.desktop", "[Desktop Entry]\nType=Application\nExec=a\n"),
            ("empty-name.desktop", "[Desktop Entry]\nType=Application\nName=\nExec=a\n"),
            ("no-exec.desktop", "[Desktop Entry]\nType=Application\nName=A\n"),
            ("link.desktop", "[Desktop Entry]\nType=Link\nName=A\nExec=a\n"),
            ("wrong.directory", "[Desktop Entry]\nType=Application\nName=A\nExec=a\n"),
            ("notype.directory", "[Desktop Entry]\nName=A\n"),
            ("other.txt", "[Desktop Entry]\nType=Application\nName=A\nExec=a\n"),
        ];
        for (name, content) in cases {
            let path = write(dir.path(), name, content);
            assert!(loader.load(&path).is_none(), "{name} should not load");
        }
        assert!(loader.load(&dir.path().join("missing.desktop")).is_none());
    }

    #[test]
    fn test_load_directory_and_kde_group() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let path = write(
            dir.path(),
            "Games.directory",
            "[KDE Desktop Entry]\nType=Directory\nName=Games\nIcon=games\nExec=ignored\n",
        );
        let entry = loader.load(&path).unwrap();
        assert_eq!(entry.kind(), EntryKind::Directory);
        assert_eq!(entry.icon(), Some("games"));
        assert_eq!(entry.exec(), None);
    }

    #[test]
    fn test_show_in_environment() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let cases = [
            ("OnlyShowIn=GNOME;MATE;", true),
            ("OnlyShowIn=KDE;", false),
            ("NotShowIn=MATE;", false),
            ("NotShowIn=XFCE;", true),
            ("OnlyShowIn=MATE;\nNotShowIn=MATE;", true),
        ];
        for (i, (keys, expected)) in cases.into_iter().enumerate() {
            let content = format!("[Desktop Entry]\nType=Application\nName=A\nExec=a\n{keys}\n");
            let path = write(dir.path(), &format!("e{i}.desktop"), &content);
            assert_eq!(loader.load(&path).unwrap().show_in_environment(), expected, "{keys}");
        }
    }

    #[test]
    fn test_tryexec_lookup_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let prog = bin.join("present");
        fs::write(&prog, "").unwrap();
        fs::set_permissions(&prog, fs::Permissions::from_mode(0o755)).unwrap();

        let loader = EntryLoader::new("MATE", bin.to_string_lossy());
        let ok = write(
            dir.path(),
            "ok.desktop",
            "[Desktop Entry]\nType=Application\nName=A\nExec=a\nTryExec= present \nNoDisplay=true\n",
        );
        let missing = write(
            dir.path(),
            "missing.desktop",
            "[Desktop Entry]\nType=Application\nName=A\nExec=a\nTryExec=absent\nHidden=true\n",
        );

        let ok = loader.load(&ok).unwrap();
        assert!(!ok.tryexec_failed());
        assert!(ok.no_display());

        let missing = loader.load(&missing).unwrap();
        assert!(missing.tryexec_failed());
        assert!(missing.hidden());
    }

    #[test]
    fn test_categories_are_interned() {
        let interner = CategoryInterner::default();
        let a = interner.intern("Utility");
        let b = interner.intern("Utility");
        let c = interner.intern("Game");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "Utility");
    }

    #[test]
    fn test_copy_and_legacy_category() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let entry = app(&loader, dir.path(), "plain.desktop");
        assert!(!entry.has_categories());

        let copy = entry.copy();
        assert!(!copy.ptr_eq(&entry));
        assert_eq!(copy.name(), entry.name());

        let legacy = entry.with_legacy_category(loader.categories());
        assert_eq!(legacy.categories().len(), 1);
        assert!(legacy.has_category(&loader.categories().intern(LEGACY_CATEGORY)));
        assert!(!entry.has_categories());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let entry = app(&loader, dir.path(), "a.desktop");
        write(
            dir.path(),
            "a.desktop",
            "[Desktop Entry]\nType=Application\nName=Renamed\nExec=app\n",
        );
        let reloaded = entry.reload(&loader).unwrap();
        assert_eq!(reloaded.name(), "Renamed");
        assert_eq!(entry.name(), "App");

        fs::remove_file(entry.path()).unwrap();
        assert!(entry.reload(&loader).is_none());
    }

    #[test]
    fn test_set_algebra() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let x = app(&loader, dir.path(), "x.desktop");
        let y = app(&loader, dir.path(), "y.desktop");
        let z = app(&loader, dir.path(), "z.desktop");

        let a = set_of(&[("x", &x), ("y", &y)]);
        let b = set_of(&[("y", &z), ("z", &z)]);

        let mut union = a.clone();
        union.union(&b);
        assert_eq!(ids(&union), vec!["x", "y", "z"]);
        assert!(union.lookup("y").unwrap().ptr_eq(&z));

        let mut inter = a.clone();
        inter.intersection(&b);
        assert_eq!(ids(&inter), vec!["y"]);
        assert!(inter.lookup("y").unwrap().ptr_eq(&y));

        let mut diff = a.clone();
        diff.subtract(&b);
        assert_eq!(ids(&diff), vec!["x"]);

        let mut self_union = a.clone();
        self_union.union(&a);
        assert_eq!(ids(&self_union), ids(&a));

        let mut self_diff = a.clone();
        self_diff.subtract(&a);
        assert!(self_diff.is_empty());

        let mut empty_inter = a.clone();
        empty_inter.intersection(&DesktopEntrySet::new());
        assert!(empty_inter.is_empty());
    }

    #[test]
    fn test_add_entry_replaces_and_swap() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader();
        let x = app(&loader, dir.path(), "x.desktop");
        let y = app(&loader, dir.path(), "y.desktop");

        let mut a = DesktopEntrySet::new();
        a.add_entry(x.clone(), "id");
        a.add_entry(y.clone(), "id");
        assert_eq!(a.len(), 1);
        assert!(a.lookup("id").unwrap().ptr_eq(&y));

        let mut b = DesktopEntrySet::new();
        a.swap_contents(&mut b);
        assert!(a.is_empty());
        assert!(b.contains("id"));

        let mut seen = Vec::new();
        b.for_each(|id, _| seen.push(id.to_string()));
        assert_eq!(seen, vec!["id"]);
    }

    #[test]
    fn test_empty_set_drops_cleanly() {
        let set = DesktopEntrySet::new();
        assert_eq!(set.len(), 0);
        drop(set);
    }
}
