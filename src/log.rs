//! Tracing setup for the binary.
//!
//! Log records go to stderr and to `desktop-menus.log`; stdout is reserved for the menu
//! listing itself.

// -- std imports (conditional)
#[cfg(debug_assertions)]
use std::fs;

// -- std imports
use std::{io, path::PathBuf, sync::OnceLock};

// -- crate imports (conditional)
#[cfg(all(debug_assertions, feature = "tokio-console"))]
use console_subscriber::ConsoleLayer;

// -- crate imports
use anyhow::{Context, Result};
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*, registry::Registry};

/// Keeps the non-blocking file writer's worker alive until the process exits.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Application name, used for the XDG data directory.
#[cfg(not(debug_assertions))]
const APP_NAME: &str = "desktop-menus";

/// Name of the log file created by the application.
const LOG_FILE_NAME: &str = "desktop-menus.log";

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// Returns the path to the log file.
///
/// Debug builds log to `./desktop-menus.log`, replacing the previous run's file. Release
/// builds log into the XDG data directory.
///
/// # Errors
/// - [`anyhow::Error`] if the XDG data directory cannot be used or created (release builds
///   only).
pub fn log_filepath() -> Result<PathBuf> {
    #[cfg(debug_assertions)]
    {
        let path = PathBuf::from(LOG_FILE_NAME);
        let _ = fs::remove_file(&path);
        Ok(path)
    }

    #[cfg(not(debug_assertions))]
    {
        xdg::BaseDirectories::with_prefix(APP_NAME)
            .place_data_file(LOG_FILE_NAME)
            .with_context(|| format!("Could not determine log file path for {APP_NAME}"))
    }
}

/// Builds a non-blocking writer appending to [`log_filepath`].
///
/// # Errors
/// - [`anyhow::Error`] if the log file path cannot be determined.
fn build_file_writer() -> Result<NonBlocking> {
    let path = log_filepath()?;

    let dir = path
        .parent()
        .context("Could not determine log file directory")?;
    let file_name = path
        .file_name()
        .context("Could not determine log file name")?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    Ok(file_writer)
}

/// Installs a subscriber that discards everything.
///
/// # Errors
/// - [`anyhow::Error`] if a global subscriber is already installed.
pub fn init_silent() -> Result<()> {
    tracing::subscriber::set_global_default(tracing::subscriber::NoSubscriber::default())
        .context("Failed to set no-op subscriber")
}

/// Initializes global tracing with stderr and file logging.
///
/// `RUST_LOG` overrides the default level.
///
/// # Errors
/// - [`anyhow::Error`] if the global tracing subscriber cannot be installed.
pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LOG_LEVEL.into())
        .from_env_lossy();

    #[cfg(debug_assertions)]
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_filter(env_filter.clone());

    #[cfg(not(debug_assertions))]
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(env_filter.clone());

    match build_file_writer() {
        Ok(writer) => {
            #[cfg(debug_assertions)]
            let file_layer = fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter);

            #[cfg(not(debug_assertions))]
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_target(false)
                .with_filter(env_filter);

            #[cfg(all(debug_assertions, feature = "tokio-console"))]
            let subscriber = Registry::default()
                .with(stderr_layer)
                .with(file_layer)
                .with(ConsoleLayer::builder().spawn());

            #[cfg(not(all(debug_assertions, feature = "tokio-console")))]
            let subscriber = Registry::default().with(stderr_layer).with(file_layer);

            tracing::subscriber::set_global_default(subscriber)?;
        }
        Err(e) => {
            let subscriber = Registry::default().with(stderr_layer);
            tracing::subscriber::set_global_default(subscriber)?;

            warn!("File logging could not be initialized, logging to stderr only: {e}");
        }
    }

    Ok(())
}
