//! Wire types for the GitLab pipelines API.

use serde::{Deserialize, Serialize};

/// A pipeline as returned by `GET /projects/:id/pipelines` and
/// `GET /projects/:id/pipelines/:pipeline_id`.
///
/// Only the fields ci-watcher needs are decoded; everything else in the
/// payload is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Instance-wide pipeline id.
    pub id: u64,
    /// Branch or tag the pipeline ran for.
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    /// Raw GitLab status (`success`, `failed`, `running`, `canceled`, ...).
    #[serde(default)]
    pub status: String,
    /// Browser link to the pipeline page.
    #[serde(default)]
    pub web_url: String,
}
