//! Error types of the library.
//!
//! Only two operations fail with a typed error: loading a menu file and registering an OS
//! watch. Everything else degrades to "produces nothing" and logs.

// -- std imports
use std::{io, path::PathBuf};

// -- crate imports
use thiserror::Error;

/// Failure to load one menu file.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The file could not be read.
    #[error("failed to read menu file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The markup is not well formed.
    #[error("{path}: malformed markup: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },

    /// An element, attribute, or text violates the menu file grammar.
    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },

    /// The document holds no toplevel `<Menu>`.
    #[error("{path}: no toplevel <Menu> element")]
    NoToplevelMenu { path: PathBuf },
}

impl LayoutError {
    pub(crate) fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failure to set up change notification.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The notification backend could not be started.
    #[error("failed to start file watcher: {0}")]
    Init(#[source] notify::Error),

    /// The backend refused to watch a path.
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
