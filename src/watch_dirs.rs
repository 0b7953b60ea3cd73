//! Application directory paths for ci-watcher.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Config | `~/.config/ci-watcher/` | `~/Library/Application Support/ci-watcher/` |
//! | Cache | `~/.cache/ci-watcher/` | `~/Library/Caches/ci-watcher/` |
//!
//! # Environment Overrides
//!
//! - `CI_WATCHER_CONFIG_DIR`: overrides [`config_dir`]
//! - `CI_WATCHER_CACHE_DIR`: overrides [`cache_dir`]

use std::path::{Path, PathBuf};

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CI_WATCHER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("ci-watcher"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ci-watcher-config"))
}

/// Application cache directory.
///
/// Holds the status snapshot read by status bars and the pause marker.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CI_WATCHER_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("ci-watcher"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ci-watcher-cache"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default snapshot file (`cache_dir()/ci_status.json`).
#[must_use]
pub fn status_file() -> PathBuf {
    cache_dir().join("ci_status.json")
}

/// Default pause marker (`cache_dir()/ci_paused`).
#[must_use]
pub fn pause_file() -> PathBuf {
    cache_dir().join("ci_paused")
}

/// Expand a leading `~/` to the user's home directory.
///
/// Paths without the prefix, or when no home directory is known, are
/// returned unchanged.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
