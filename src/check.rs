//! Executable resolution for `TryExec`.
//!
//! A desktop entry whose `TryExec` program cannot be found is flagged as
//! [`EntryFlags::TRYEXEC_FAILED`](crate::desktop_entries::EntryFlags) and dropped from
//! menus. Lookups are synchronous since they run inline with directory scans.

// -- std imports
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Resolve a `TryExec` value to an on-disk executable path, if possible.
///
/// Rules:
/// - If `token` contains `/`, treat it as a path and validate it directly.
/// - Otherwise search `path_env`.
pub fn resolve_executable(token: &str, path_env: &str) -> Option<PathBuf> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if token.contains('/') {
        let p = Path::new(token);
        return is_executable_file(p).then(|| p.to_path_buf());
    }

    which_in_path(token, path_env)
}

/// Search for `cmd` in the given PATH string.
///
/// Returns the first match that is an executable file.
pub fn which_in_path(cmd: &str, path_env: &str) -> Option<PathBuf> {
    path_env
        .split(':')
        .filter(|s| !s.is_empty())
        .map(|dir| Path::new(dir).join(cmd))
        .find(|candidate| is_executable_file(candidate))
}

/// Check whether `p` exists, is a regular file, and has any executable bit set.
pub fn is_executable_file(p: &Path) -> bool {
    let md = match fs::metadata(p) {
        Ok(m) => m,
        Err(_) => return false,
    };

    if !md.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        (md.permissions().mode() & 0o111) != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
