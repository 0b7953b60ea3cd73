//! GitLab pipelines client.
//!
//! Each method performs exactly one HTTP request and classifies the outcome
//! into [`ApiError`]. Retrying is the caller's business.

use crate::config::ApiConfig;
use crate::error::{ApiError, Result};
use crate::http::build_client;
use crate::types::Pipeline;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::trace;

/// Header GitLab reads personal/project access tokens from.
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Client for one GitLab instance.
#[derive(Debug, Clone)]
pub struct GitlabClient {
    config: ApiConfig,
    http: reqwest::Client,
}

impl GitlabClient {
    /// Create a client, validating the configuration first.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] for an invalid configuration or
    /// [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self> {
        config.validate()?;
        let http = build_client(&config)?;
        Ok(Self { config, http })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Fetch the most recent pipeline for `git_ref`, or `None` when the ref
    /// has never run a pipeline.
    ///
    /// # Errors
    ///
    /// See [`ApiError`] for the classification of failed responses.
    pub async fn latest_pipeline(&self, project_id: u64, git_ref: &str) -> Result<Option<Pipeline>> {
        let url = format!(
            "{}/api/v4/projects/{project_id}/pipelines",
            self.config.trimmed_base_url()
        );
        trace!(project_id, git_ref, "listing latest pipeline");
        let list: Vec<Pipeline> = self
            .get_json(&url, &[("ref", git_ref), ("per_page", "1")])
            .await?;
        Ok(list.into_iter().next())
    }

    /// Fetch a single pipeline's detail record.
    ///
    /// # Errors
    ///
    /// See [`ApiError`] for the classification of failed responses.
    pub async fn pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        let url = format!(
            "{}/api/v4/projects/{project_id}/pipelines/{pipeline_id}",
            self.config.trimmed_base_url()
        );
        trace!(project_id, pipeline_id, "fetching pipeline detail");
        self.get_json(&url, &[]).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited {
                retry_after: parse_retry_after(resp.headers()),
            });
        }
        if status.is_server_error() {
            return Err(ApiError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Http(format!("failed to read response body: {e}")))?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// Missing, non-numeric and non-positive values yield `None`.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    (secs > 0).then(|| Duration::from_secs(secs))
}
