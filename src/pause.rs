//! Pause control for the scheduler.

use std::path::{Path, PathBuf};

/// Cheap predicate consulted before every pass.
pub trait PauseSignal: Send + Sync {
    fn is_paused(&self) -> bool;
}

/// Pauses polling while a marker file exists.
#[derive(Debug, Clone)]
pub struct MarkerFilePause {
    path: PathBuf,
}

impl MarkerFilePause {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker (and its directory).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker cannot be created.
    pub fn pause(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"")
    }

    /// Remove the marker. Removing an absent marker is not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for any failure other than "not found".
    pub fn resume(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl PauseSignal for MarkerFilePause {
    fn is_paused(&self) -> bool {
        !self.path.as_os_str().is_empty() && self.path.exists()
    }
}
