//! Resolution of XDG desktop menus.
//!
//! A menu file (`applications.menu`) describes which `.desktop` entries show up in which
//! submenus. [`MenuContext::lookup`] loads such a file, follows its merges and moves,
//! matches entries against the include rules and arranges the result according to the
//! layout hints. The returned [`MenuTree`] keeps watching everything it read and rebuilds
//! itself on change, notifying its monitors.
//!
//! ```no_run
//! use desktop_menus::{Environment, ManualWatchService, MenuContext, TreeFlags};
//!
//! let context = MenuContext::new(Environment::from_env(), Box::new(ManualWatchService::new()));
//! let tree = context.lookup("applications.menu", TreeFlags::empty());
//! if let Some(root) = tree.root_directory() {
//!     for line in desktop_menus::report::dump_lines(&root) {
//!         println!("{line}");
//!     }
//! }
//! ```

pub mod check;
pub mod context;
pub mod desktop;
pub mod desktop_entries;
pub mod entry_directories;
pub mod error;
pub mod layout;
pub mod linux_fs;
pub mod monitor;
pub mod report;
pub mod tree;
pub mod watcher;

pub use context::MenuContext;
pub use error::{LayoutError, WatchError};
pub use linux_fs::Environment;
pub use monitor::{ManualWatchService, MonitorEvent, WatchKind, WatchService};
pub use tree::{
    Alias, Directory, Entry, Header, ItemType, MenuTree, Separator, SortKey, TreeFlags, TreeItem,
    TreeMonitor,
};
pub use watcher::NotifyWatchService;
