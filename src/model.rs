//! Domain types shared by the polling core and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(project, ref)` pair whose latest pipeline status is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef {
    /// GitLab project id.
    pub project_id: u64,
    /// Branch or tag name.
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl TargetRef {
    /// Create a new target.
    pub fn new(project_id: u64, git_ref: impl Into<String>) -> Self {
        Self {
            project_id,
            git_ref: git_ref.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project_id, self.git_ref)
    }
}

/// Closed set of pipeline states the watcher reasons about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failed,
    Running,
    Cancelled,
    /// Anything GitLab reports that is not one of the above, and the
    /// "no pipeline yet" placeholder.
    #[default]
    Other,
}

impl PipelineStatus {
    /// Map GitLab's status vocabulary onto the closed set.
    pub fn from_gitlab(raw: &str) -> Self {
        match raw {
            "success" => Self::Success,
            "failed" => Self::Failed,
            "running" => Self::Running,
            "canceled" | "cancelled" => Self::Cancelled,
            _ => Self::Other,
        }
    }

    /// Stable lowercase name, used in the snapshot file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The latest known pipeline for a target at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineObservation {
    /// Pipeline id; `0` when the ref has no pipeline yet.
    pub id: u64,
    /// Ref the pipeline ran for.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Mapped status. Change detection only ever looks at this.
    pub status: PipelineStatus,
    /// Upstream status text, kept for display.
    #[serde(default)]
    pub raw_status: String,
    /// Browser link, possibly empty.
    #[serde(default)]
    pub link: String,
}

impl PipelineObservation {
    /// Placeholder for a ref that has never run a pipeline.
    pub fn none_yet(git_ref: impl Into<String>) -> Self {
        Self {
            id: 0,
            git_ref: git_ref.into(),
            status: PipelineStatus::Other,
            raw_status: String::new(),
            link: String::new(),
        }
    }

    /// Build an observation from a raw GitLab status string.
    pub fn from_gitlab(
        id: u64,
        git_ref: impl Into<String>,
        raw_status: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        let raw_status = raw_status.into();
        Self {
            id,
            git_ref: git_ref.into(),
            status: PipelineStatus::from_gitlab(&raw_status),
            raw_status,
            link: link.into(),
        }
    }

    /// Text used when the status is not one of the well-known ones.
    pub fn display_status(&self) -> &str {
        if self.raw_status.is_empty() {
            self.status.as_str()
        } else {
            &self.raw_status
        }
    }
}

/// Value handed to the snapshot sink after a detected change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub target: TargetRef,
    pub observation: PipelineObservation,
    pub retrieved_at: DateTime<Utc>,
}
