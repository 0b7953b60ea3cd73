//! ci-watcher: desktop notifications for GitLab CI pipeline status changes.
//!
//! A fixed-interval scheduler polls the latest pipeline of every configured
//! `(project, ref)` pair and raises a notification whenever its id or status
//! changes, keeping the latest change in a small JSON snapshot file.
//!
//! # Architecture
//!
//! - **Fetcher**: resolves the latest pipeline with retry, backoff and
//!   rate-limit cooperation ([`fetcher::RemoteStatusFetcher`])
//! - **Detector**: remembers the last `(id, status)` per target and fires
//!   best-effort side effects on change ([`detector::ChangeDetector`])
//! - **Scheduler**: pausable tick loop over an atomically replaceable target
//!   list ([`scheduler::Scheduler`])
//! - **Config watch**: debounced hot reload of the target list
//!   ([`config_watch::ConfigWatchBridge`])

pub mod backoff;
pub mod cache;
pub mod config;
pub mod config_watch;
pub mod detector;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod notifier;
pub mod pause;
pub mod scheduler;
pub mod watch_dirs;

pub use config::WatcherConfig;
pub use error::{FetchError, Result, WatchError};
pub use model::{PipelineObservation, PipelineStatus, Snapshot, TargetRef};
pub use scheduler::{PassReport, Scheduler};
