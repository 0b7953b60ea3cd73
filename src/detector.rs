//! Per-target change detection.
//!
//! The detector remembers the last `(pipeline id, status)` it saw for every
//! target. A fetched observation that differs from that memory (or the first
//! one for a target) is a change: it is written to the snapshot sink, shown
//! through the notifier, and only then recorded as last seen. Sink and
//! notifier failures are logged and otherwise ignored.

use crate::cache::SnapshotSink;
use crate::error::FetchError;
use crate::fetcher::PipelineSource;
use crate::model::{PipelineObservation, PipelineStatus, Snapshot, TargetRef};
use crate::notifier::Notifier;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of evaluating one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Same `(id, status)` as last time.
    Unchanged,
    /// New observation; side effects were attempted.
    Changed(PipelineObservation),
}

impl Evaluation {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

/// Stateful change detector.
pub struct ChangeDetector {
    source: Arc<dyn PipelineSource>,
    sink: Arc<dyn SnapshotSink>,
    notifier: Arc<dyn Notifier>,
    last_seen: HashMap<TargetRef, (u64, PipelineStatus)>,
}

impl ChangeDetector {
    pub fn new(
        source: Arc<dyn PipelineSource>,
        sink: Arc<dyn SnapshotSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            sink,
            notifier,
            last_seen: HashMap::new(),
        }
    }

    /// Last recorded `(id, status)` for `target`.
    pub fn last_seen(&self, target: &TargetRef) -> Option<(u64, PipelineStatus)> {
        self.last_seen.get(target).copied()
    }

    /// Fetch `target` and act on a change.
    ///
    /// # Errors
    ///
    /// Returns the fetch error unchanged; memory is not touched in that case.
    pub async fn evaluate(
        &mut self,
        cancel: &CancellationToken,
        target: &TargetRef,
    ) -> Result<Evaluation, FetchError> {
        let observation = self.source.fetch(cancel, target).await?;
        let current = (observation.id, observation.status);

        if self.last_seen.get(target) == Some(&current) {
            debug!(%target, pipeline_id = observation.id, "no change");
            return Ok(Evaluation::Unchanged);
        }

        info!(
            %target,
            pipeline_id = observation.id,
            status = observation.display_status(),
            "pipeline status changed"
        );

        let snapshot = Snapshot {
            target: target.clone(),
            observation: observation.clone(),
            retrieved_at: Utc::now(),
        };
        if let Err(e) = self.sink.write(&snapshot).await {
            warn!(%target, error = %e, "snapshot write failed");
        }

        let title = title_for(&observation);
        let body = format!("Pipeline #{} ({})", observation.id, observation.git_ref);
        if let Err(e) = self.notifier.notify(&title, &body, &observation.link).await {
            warn!(%target, error = %e, "notification failed");
        }

        self.last_seen.insert(target.clone(), current);
        Ok(Evaluation::Changed(observation))
    }
}

/// Notification title for an observation.
pub fn title_for(observation: &PipelineObservation) -> String {
    match observation.status {
        PipelineStatus::Success => "✅ CI: success".to_owned(),
        PipelineStatus::Failed => "❌ CI: failed".to_owned(),
        PipelineStatus::Running => "▶️ CI: running".to_owned(),
        PipelineStatus::Cancelled => "⛔ CI: canceled".to_owned(),
        PipelineStatus::Other => format!("ℹ️ CI: {}", observation.display_status()),
    }
}
