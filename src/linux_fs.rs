//! Environment-derived search paths.
//!
//! Everything the engine reads from the process environment is gathered once into an
//! [`Environment`], following XDG base directory conventions. Tests build one by hand
//! pointing into temporary directories.

// -- std imports
use std::{
    env, fs,
    path::{Path, PathBuf},
};

// -- crate imports
use tracing::debug;
use xdg::BaseDirectories;

/// Desktop token matched against `OnlyShowIn`/`NotShowIn` when nothing else is configured.
pub const DEFAULT_DESKTOP_NAME: &str = "MATE";

/// Well-known toplevel menu that honors [`Environment::menu_prefix`].
pub const APPLICATIONS_MENU: &str = "applications.menu";

/// Search paths and environment tokens used while resolving menus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// `$XDG_CONFIG_HOME` (default: `~/.config`).
    pub user_config_dir: Option<PathBuf>,
    /// `$XDG_CONFIG_DIRS` in priority order.
    pub system_config_dirs: Vec<PathBuf>,
    /// `$XDG_DATA_HOME` (default: `~/.local/share`).
    pub user_data_dir: Option<PathBuf>,
    /// `$XDG_DATA_DIRS` in priority order.
    pub system_data_dirs: Vec<PathBuf>,
    /// `$XDG_MENU_PREFIX`, tried on `applications.menu` before the bare name.
    pub menu_prefix: Option<String>,
    /// Desktop environment token for `OnlyShowIn`/`NotShowIn`.
    pub desktop_name: String,
    /// Search path for `TryExec` programs.
    pub path_env: String,
}

impl Environment {
    /// Reads the XDG base directories, `XDG_MENU_PREFIX`, and `PATH`.
    pub fn from_env() -> Self {
        let xdg = BaseDirectories::new();
        let menu_prefix = env::var("XDG_MENU_PREFIX")
            .ok()
            .filter(|prefix| !prefix.is_empty());

        let environment = Self {
            user_config_dir: xdg.get_config_home(),
            system_config_dirs: xdg.get_config_dirs(),
            user_data_dir: xdg.get_data_home(),
            system_data_dirs: xdg.get_data_dirs(),
            menu_prefix,
            desktop_name: DEFAULT_DESKTOP_NAME.to_string(),
            path_env: env::var("PATH").unwrap_or_default(),
        };
        debug!("Environment from process: {environment:#?}");
        environment
    }

    /// Configuration directories from most to least specific: the user dir first.
    pub fn config_dirs(&self) -> impl Iterator<Item = &Path> {
        self.user_config_dir
            .iter()
            .chain(self.system_config_dirs.iter())
            .map(PathBuf::as_path)
    }

    /// Data directories from most to least specific: the user dir first.
    pub fn data_dirs(&self) -> impl Iterator<Item = &Path> {
        self.user_data_dir
            .iter()
            .chain(self.system_data_dirs.iter())
            .map(PathBuf::as_path)
    }

    /// File names to try for the toplevel menu `basename`, prefixed variant first.
    pub fn menu_file_candidates(&self, basename: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        if basename == APPLICATIONS_MENU {
            if let Some(prefix) = &self.menu_prefix {
                names.push(format!("{prefix}{basename}"));
            }
        }
        names.push(basename.to_string());
        names
    }
}

/// Absolute form of `path` with every symlink resolved, or `None` if it does not exist.
pub fn canonicalize(path: &Path) -> Option<PathBuf> {
    match fs::canonicalize(path) {
        Ok(canonical) => Some(canonical),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not canonicalize");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_prefix_only_applies_to_applications_menu() {
        let env = Environment {
            menu_prefix: Some("mate-".into()),
            ..Environment::default()
        };
        assert_eq!(
            env.menu_file_candidates("applications.menu"),
            vec!["mate-applications.menu", "applications.menu"]
        );
        assert_eq!(
            env.menu_file_candidates("settings.menu"),
            vec!["settings.menu"]
        );
    }

    #[test]
    fn test_dirs_put_user_first() {
        let env = Environment {
            user_config_dir: Some("/home/u/.config".into()),
            system_config_dirs: vec!["/etc/xdg".into(), "/opt/xdg".into()],
            user_data_dir: None,
            system_data_dirs: vec!["/usr/share".into()],
            ..Environment::default()
        };
        let config: Vec<_> = env.config_dirs().collect();
        assert_eq!(
            config,
            vec![
                Path::new("/home/u/.config"),
                Path::new("/etc/xdg"),
                Path::new("/opt/xdg")
            ]
        );
        let data: Vec<_> = env.data_dirs().collect();
        assert_eq!(data, vec![Path::new("/usr/share")]);
    }

    #[test]
    fn test_canonicalize_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(canonicalize(&dir.path().join("nope")).is_none());
        assert!(canonicalize(dir.path()).is_some());
    }
}
