//! Resilient latest-pipeline lookup.
//!
//! A lookup is two calls: list the newest pipeline for the ref, then fetch
//! its detail record for the canonical browser link. Only the first call is
//! retried. Rate-limit hints are honored before the regular backoff delay,
//! and every sleep races the caller's cancellation token.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::FetchError;
use crate::model::{PipelineObservation, TargetRef};
use async_trait::async_trait;
use gitlab_api::{ApiError, GitlabClient, Pipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Remote CI provider as seen by the fetcher.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Newest pipeline for `git_ref`, or `None` if there is none yet.
    async fn latest_pipeline(&self, project_id: u64, git_ref: &str) -> gitlab_api::Result<Option<Pipeline>>;

    /// Detail record for one pipeline.
    async fn pipeline_detail(&self, project_id: u64, pipeline_id: u64) -> gitlab_api::Result<Pipeline>;
}

#[async_trait]
impl CiProvider for GitlabClient {
    async fn latest_pipeline(&self, project_id: u64, git_ref: &str) -> gitlab_api::Result<Option<Pipeline>> {
        GitlabClient::latest_pipeline(self, project_id, git_ref).await
    }

    async fn pipeline_detail(&self, project_id: u64, pipeline_id: u64) -> gitlab_api::Result<Pipeline> {
        self.pipeline(project_id, pipeline_id).await
    }
}

/// Anything that can resolve a target to its latest observation.
#[async_trait]
pub trait PipelineSource: Send + Sync {
    /// Resolve the latest pipeline for `target`.
    ///
    /// # Errors
    ///
    /// See [`FetchError`].
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        target: &TargetRef,
    ) -> Result<PipelineObservation, FetchError>;
}

/// [`PipelineSource`] backed by a [`CiProvider`] with retry and backoff.
pub struct RemoteStatusFetcher {
    provider: Arc<dyn CiProvider>,
    policy: BackoffPolicy,
}

impl RemoteStatusFetcher {
    /// Create a fetcher with the default backoff policy.
    pub fn new(provider: Arc<dyn CiProvider>) -> Self {
        Self {
            provider,
            policy: BackoffPolicy::default(),
        }
    }

    /// Replace the backoff policy.
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Best-effort detail lookup for a canonical link. Never fails.
    async fn resolve(
        &self,
        cancel: &CancellationToken,
        target: &TargetRef,
        summary: Pipeline,
    ) -> PipelineObservation {
        let detail = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            res = self.provider.pipeline_detail(target.project_id, summary.id) => match res {
                Ok(detail) => Some(detail),
                Err(e) => {
                    debug!(%target, pipeline_id = summary.id, error = %e, "pipeline detail unavailable; keeping summary link");
                    None
                }
            },
        };

        let link = detail
            .map(|d| d.web_url)
            .filter(|url| !url.is_empty())
            .unwrap_or(summary.web_url);
        let git_ref = if summary.git_ref.is_empty() {
            target.git_ref.clone()
        } else {
            summary.git_ref
        };
        PipelineObservation::from_gitlab(summary.id, git_ref, summary.status, link)
    }
}

#[async_trait]
impl PipelineSource for RemoteStatusFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        target: &TargetRef,
    ) -> Result<PipelineObservation, FetchError> {
        let mut backoff = Backoff::new(self.policy.clone());
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                res = self.provider.latest_pipeline(target.project_id, &target.git_ref) => res,
            };

            let err = match result {
                Ok(None) => return Ok(PipelineObservation::none_yet(target.git_ref.clone())),
                Ok(Some(summary)) => return Ok(self.resolve(cancel, target, summary).await),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(FetchError::Terminal(err.to_string()));
            }

            if let Some(wait) = err.retry_after() {
                debug!(%target, attempt, wait_ms = wait.as_millis() as u64, "rate limited; honoring Retry-After");
                sleep_or_cancel(cancel, wait).await?;
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(exhausted(&err, backoff.budget()));
            };
            debug!(
                %target,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure; retrying"
            );
            sleep_or_cancel(cancel, delay).await?;
        }
    }
}

fn exhausted(err: &ApiError, budget: Duration) -> FetchError {
    let last = err.to_string();
    warn!(budget_ms = budget.as_millis() as u64, error = %last, "retry budget exhausted");
    if matches!(err, ApiError::RateLimited { .. }) {
        FetchError::RateLimited { budget, last }
    } else {
        FetchError::Transient { budget, last }
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> Result<(), FetchError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(FetchError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
