//! Command-line argument definitions.
//!
//! This module defines the CLI surfaced by `desktop-menus`.

// -- crate imports
use clap::Parser;
use desktop_menus::{SortKey, TreeFlags};

/// Command-line arguments for `desktop-menus`.
///
/// Use `--help` to see all options and defaults.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "desktop-menus",
    about = "Resolve an XDG menu file and list the applications it contains"
)]
pub struct Args {
    /// Menu file to load: a basename searched in the config dirs, or an absolute path
    #[arg(long, default_value = "applications.menu")]
    pub file: String,

    /// Menu prefix tried before applications.menu (overrides XDG_MENU_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Desktop environment name for OnlyShowIn/NotShowIn
    #[arg(long)]
    pub desktop: Option<String>,

    /// Keep entries removed by <Exclude> rules, marked as excluded
    #[arg(long)]
    pub include_excluded: bool,

    /// Keep entries with NoDisplay=true, marked as nodisplay
    #[arg(long)]
    pub include_nodisplay: bool,

    /// Keep menus without any entries
    #[arg(long)]
    pub show_empty: bool,

    /// Keep separators at the edges of menus and next to each other
    #[arg(long)]
    pub show_all_separators: bool,

    /// Sort entries by their full name instead of their name
    #[arg(long)]
    pub sort_display_name: bool,

    /// Print JSON output (machine readable)
    #[arg(long)]
    pub json: bool,

    /// Keep running and print the menu again whenever it changes
    #[arg(long)]
    pub monitor: bool,

    /// Suppress all logging output
    #[arg(long)]
    pub no_log: bool,
}

impl Args {
    pub fn tree_flags(&self) -> TreeFlags {
        let mut flags = TreeFlags::empty();
        flags.set(TreeFlags::INCLUDE_EXCLUDED, self.include_excluded);
        flags.set(TreeFlags::INCLUDE_NODISPLAY, self.include_nodisplay);
        flags.set(TreeFlags::SHOW_EMPTY, self.show_empty);
        flags.set(TreeFlags::SHOW_ALL_SEPARATORS, self.show_all_separators);
        flags
    }

    pub fn sort_key(&self) -> SortKey {
        if self.sort_display_name {
            SortKey::DisplayName
        } else {
            SortKey::Name
        }
    }
}
