#![allow(dead_code)]

use desktop_menus::{
    Directory, Environment, ManualWatchService, MenuContext, MenuTree, MonitorEvent, TreeFlags,
    TreeItem, report,
};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// An isolated XDG tree with a manually driven watch service.
///
/// Layout below the canonical temp root:
/// - `config/menus`: user menu files
/// - `xdg/menus`: system menu files
/// - `data/applications`, `data/desktop-directories`: user entries
/// - `share/applications`, `share/desktop-directories`: system entries
pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub service: ManualWatchService,
    pub context: MenuContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_env(|_| {})
    }

    pub fn with_env(configure: impl FnOnce(&mut Environment)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for sub in [
            "config/menus",
            "xdg/menus",
            "data/applications",
            "data/desktop-directories",
            "share/applications",
        ] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }

        let mut env = Environment {
            user_config_dir: Some(root.join("config")),
            system_config_dirs: vec![root.join("xdg")],
            user_data_dir: Some(root.join("data")),
            system_data_dirs: vec![root.join("share")],
            menu_prefix: None,
            desktop_name: "MATE".to_string(),
            path_env: String::new(),
        };
        configure(&mut env);

        let service = ManualWatchService::new();
        let context = MenuContext::new(env, Box::new(service.clone()));
        Self {
            _dir: dir,
            root,
            service,
            context,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn user_apps(&self) -> PathBuf {
        self.path("data/applications")
    }

    pub fn system_apps(&self) -> PathBuf {
        self.path("share/applications")
    }

    /// Writes `content` at `rel` below the fixture root, creating parents.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Writes a user menu file into `config/menus`.
    pub fn write_menu(&self, name: &str, body: &str) -> PathBuf {
        self.write(&format!("config/menus/{name}"), body)
    }

    /// Writes an application below `data/applications`.
    pub fn write_app(&self, rel: &str, name: &str, extra: &str) -> PathBuf {
        self.write(
            &format!("data/applications/{rel}"),
            &format!("[Desktop Entry]\nType=Application\nName={name}\nExec=true\n{extra}"),
        )
    }

    /// Writes a `.directory` file below `data/desktop-directories`.
    pub fn write_directory(&self, rel: &str, name: &str) -> PathBuf {
        self.write(
            &format!("data/desktop-directories/{rel}"),
            &format!("[Desktop Entry]\nType=Directory\nName={name}\n"),
        )
    }

    pub fn lookup(&self, file: &str) -> MenuTree {
        self.context.lookup(file, TreeFlags::empty())
    }

    /// Queues `event` for `path` and dispatches everything pending.
    pub fn notify(&self, path: &Path, event: MonitorEvent) -> usize {
        self.service.emit(path, event);
        self.context.process_events()
    }

    /// The text dump of `tree` with the fixture root replaced by `$ROOT`.
    pub fn dump(&self, tree: &MenuTree) -> Vec<String> {
        let root = tree.root_directory().expect("tree has a root");
        let prefix = self.root.display().to_string();
        report::dump_lines(&root)
            .into_iter()
            .map(|line| line.replace(&prefix, "$ROOT"))
            .collect()
    }
}

/// Counts monitor invocations of a tree.
pub fn count_changes(tree: &MenuTree) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let counter = Rc::clone(&count);
    tree.add_monitor(Rc::new(move |_| counter.set(counter.get() + 1)));
    count
}

/// Short description of each item of `directory`'s contents.
pub fn describe(directory: &Directory) -> Vec<String> {
    directory.contents().iter().map(describe_item).collect()
}

pub fn describe_item(item: &TreeItem) -> String {
    match item {
        TreeItem::Directory(d) => format!("menu:{}", d.menu_id()),
        TreeItem::Entry(e) => e.desktop_file_id().to_string(),
        TreeItem::Separator(_) => "-".to_string(),
        TreeItem::Header(h) => format!("header:{}", h.directory().menu_id()),
        TreeItem::Alias(a) => format!("alias:{}>{}", a.directory().menu_id(), describe_item(a.item())),
    }
}

/// A toplevel `Applications` menu over the default application dirs.
pub fn applications_menu(body: &str) -> String {
    format!(
        "<!DOCTYPE Menu PUBLIC \"-//freedesktop//DTD Menu 1.0//EN\"\n \
         \"http://www.freedesktop.org/standards/menu-spec/menu-1.0.dtd\">\n\
         <Menu><Name>Applications</Name><DefaultAppDirs/><DefaultDirectoryDirs/>{body}</Menu>"
    )
}
