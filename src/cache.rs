//! Snapshot persistence.
//!
//! The file holds the most recent change as a small JSON object so status
//! bars can render it without talking to GitLab:
//!
//! ```json
//! { "project_id": 42, "ref": "main", "pipeline_id": 7, "status": "success",
//!   "url": "https://gitlab.com/...", "retrieved": 1760000000 }
//! ```

use crate::error::{Result, WatchError};
use crate::model::Snapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Destination for snapshots produced by the change detector.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Persist one snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be stored. Callers treat
    /// this as best-effort.
    async fn write(&self, snapshot: &Snapshot) -> Result<()>;
}

/// On-disk representation of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub project_id: u64,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub pipeline_id: u64,
    pub status: String,
    pub url: String,
    /// Unix seconds.
    pub retrieved: i64,
}

impl From<&Snapshot> for SnapshotRecord {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            project_id: snapshot.target.project_id,
            git_ref: snapshot.observation.git_ref.clone(),
            pipeline_id: snapshot.observation.id,
            status: snapshot.observation.display_status().to_owned(),
            url: snapshot.observation.link.clone(),
            retrieved: snapshot.retrieved_at.timestamp(),
        }
    }
}

/// Writes the latest snapshot to a JSON file, replacing it atomically.
#[derive(Debug, Clone)]
pub struct FsSnapshotCache {
    path: PathBuf,
}

impl FsSnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last written record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but is unreadable or malformed.
    pub async fn read(&self) -> Result<Option<SnapshotRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotSink for FsSnapshotCache {
    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(WatchError::Cache("empty cache path".into()));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                WatchError::Cache(format!("failed to create '{}': {e}", parent.display()))
            })?;
        }

        let mut body = serde_json::to_vec_pretty(&SnapshotRecord::from(snapshot))?;
        body.push(b'\n');

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| WatchError::Cache(format!("failed to write '{}': {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            WatchError::Cache(format!(
                "failed to move snapshot into '{}': {e}",
                self.path.display()
            ))
        })
    }
}
