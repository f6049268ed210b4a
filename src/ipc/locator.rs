//! IPC channel discovery.
//!
//! The desktop application listens on `discord-ipc-<n>` for `n` in `0..=9`:
//! a Unix domain socket inside the first writable runtime directory on
//! Linux/macOS, or a named pipe on Windows. [`locate`] resolves a
//! [`PipeSelector`] to a concrete path for one [`Platform`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// File/pipe name prefix used by the desktop application.
pub const PIPE_PREFIX: &str = "discord-ipc-";

/// Environment variables consulted (in order) for the Unix runtime directory.
pub const RUNTIME_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Which channel to connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PipeSelector {
    /// First `discord-ipc-[0-9]` found.
    #[default]
    Any,
    /// `discord-ipc-<n>`.
    Index(u8),
    /// Explicit socket or pipe path.
    Path(PathBuf),
}

impl PipeSelector {
    /// Parse a CLI value: a bare integer is an index, anything else a path.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.parse::<u8>()
            .map_or_else(|_| Self::Path(PathBuf::from(raw)), Self::Index)
    }
}

/// Platform descriptor, built once and injected into the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// Unix domain sockets searched for in `runtime_dirs`, in order.
    Unix {
        /// Candidate directories.
        runtime_dirs: Vec<PathBuf>,
    },
    /// Windows named pipes.
    Windows,
}

impl Platform {
    /// Descriptor for the running OS, reading the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix {
                runtime_dirs: unix_runtime_dirs(|var| std::env::var(var).ok()),
            }
        }
    }
}

/// Candidate runtime directories: the set variables from
/// [`RUNTIME_DIR_VARS`] in order, then `/tmp`.
#[must_use]
pub fn unix_runtime_dirs<F>(lookup: F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let mut dirs: Vec<PathBuf> = RUNTIME_DIR_VARS
        .iter()
        .filter_map(|var| lookup(var))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .collect();
    dirs.push(PathBuf::from("/tmp"));
    dirs
}

/// Resolve `selector` to a channel path on `platform`.
///
/// # Errors
///
/// Returns [`AppError::InvalidPipe`] when no candidate exists (Unix) or an
/// explicit Unix path is missing.
pub fn locate(platform: &Platform, selector: &PipeSelector) -> Result<PathBuf> {
    match platform {
        Platform::Windows => Ok(match selector {
            PipeSelector::Path(path) => path.clone(),
            PipeSelector::Index(n) => windows_pipe(*n),
            PipeSelector::Any => windows_pipe(0),
        }),
        Platform::Unix { runtime_dirs } => match selector {
            PipeSelector::Path(path) if path.exists() => Ok(path.clone()),
            PipeSelector::Path(path) => Err(AppError::InvalidPipe(format!(
                "{} does not exist",
                path.display()
            ))),
            PipeSelector::Index(n) => first_match(runtime_dirs, &format!("{PIPE_PREFIX}{n}")),
            PipeSelector::Any => first_match(runtime_dirs, &format!("{PIPE_PREFIX}[0-9]")),
        },
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn windows_pipe(n: u8) -> PathBuf {
    PathBuf::from(format!(r"\\?\pipe\{PIPE_PREFIX}{n}"))
}

fn first_match(dirs: &[PathBuf], file_pattern: &str) -> Result<PathBuf> {
    for dir in dirs {
        if let Some(found) = glob_in(dir, file_pattern) {
            debug!(path = %found.display(), "locator: ipc channel found");
            return Ok(found);
        }
    }
    Err(AppError::InvalidPipe(
        "no IPC pipe found; is the desktop application running?".into(),
    ))
}

fn glob_in(dir: &Path, file_pattern: &str) -> Option<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{escaped}/{file_pattern}");
    let mut matches: Vec<PathBuf> = glob::glob(&pattern).ok()?.filter_map(|p| p.ok()).collect();
    matches.sort();
    matches.into_iter().next()
}
