//! Poll scheduler.
//!
//! Owns the authoritative target list and drives passes over it on a fixed
//! interval. The list sits behind a read/write lock as an `Arc<Vec<_>>`:
//! a pass clones the `Arc` under the read lock and releases it immediately,
//! and [`Scheduler::update_refs`] swaps in a whole new list under the write
//! lock. A pass therefore always sees one complete list.
//!
//! Passes are serialized through the detector's async mutex, so the tick
//! loop and an out-of-band reload pass never evaluate concurrently.

use crate::detector::{ChangeDetector, Evaluation};
use crate::error::FetchError;
use crate::model::{PipelineStatus, TargetRef};
use crate::pause::PauseSignal;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Targets evaluated (successfully or not).
    pub polled: usize,
    /// Targets whose observation changed.
    pub changed: usize,
    /// Targets whose fetch failed, with the failure.
    pub failures: Vec<(TargetRef, FetchError)>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fixed-interval poller over a hot-swappable target list.
pub struct Scheduler {
    detector: Mutex<ChangeDetector>,
    targets: RwLock<Arc<Vec<TargetRef>>>,
    interval: Duration,
    pause: Option<Arc<dyn PauseSignal>>,
}

impl Scheduler {
    pub fn new(detector: ChangeDetector, targets: Vec<TargetRef>, interval: Duration) -> Self {
        Self {
            detector: Mutex::new(detector),
            targets: RwLock::new(Arc::new(targets)),
            interval,
            pause: None,
        }
    }

    /// Skip passes while `signal` reports paused.
    pub fn with_pause_signal(mut self, signal: Arc<dyn PauseSignal>) -> Self {
        self.pause = Some(signal);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replace the whole target list. Does not trigger a pass.
    pub fn update_refs(&self, targets: Vec<TargetRef>) {
        let count = targets.len();
        let next = Arc::new(targets);
        match self.targets.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!(projects = count, "target list replaced");
    }

    /// Current target list.
    pub fn targets(&self) -> Arc<Vec<TargetRef>> {
        match self.targets.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Spawn [`Scheduler::run`] on the current runtime.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(cancel).await })
    }

    /// Poll immediately, then once per interval, until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            projects = self.targets().len(),
            "scheduler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(&cancel).await;
        }
        info!("scheduler stopped");
    }

    /// One pass unless paused. Returns `None` when the pass was skipped.
    pub async fn tick(&self, cancel: &CancellationToken) -> Option<PassReport> {
        if self.pause.as_ref().is_some_and(|p| p.is_paused()) {
            debug!("paused: skipping poll");
            return None;
        }
        Some(self.poll_pass(cancel).await)
    }

    /// Evaluate every current target in order. Individual failures are
    /// logged and collected; the pass continues. Cancellation ends it early.
    pub async fn poll_pass(&self, cancel: &CancellationToken) -> PassReport {
        let targets = self.targets();
        let mut detector = self.detector.lock().await;
        let mut report = PassReport::default();

        for target in targets.iter() {
            if cancel.is_cancelled() {
                break;
            }
            match detector.evaluate(cancel, target).await {
                Ok(Evaluation::Changed(_)) => {
                    report.polled += 1;
                    report.changed += 1;
                }
                Ok(Evaluation::Unchanged) => report.polled += 1,
                Err(FetchError::Cancelled) => break,
                Err(e) => {
                    warn!(
                        project_id = target.project_id,
                        git_ref = %target.git_ref,
                        error = %e,
                        "poll failed"
                    );
                    report.polled += 1;
                    report.failures.push((target.clone(), e));
                }
            }
        }

        debug!(
            polled = report.polled,
            changed = report.changed,
            failed = report.failures.len(),
            "pass complete"
        );
        report
    }

    /// Last recorded `(id, status)` for `target`, for diagnostics and tests.
    pub async fn last_seen(&self, target: &TargetRef) -> Option<(u64, PipelineStatus)> {
        self.detector.lock().await.last_seen(target)
    }
}
