//! Error types for ci-watcher.

use std::time::Duration;

/// Errors raised by the watcher outside the fetch path.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Configuration could not be read, parsed or validated.
    #[error("config error: {0}")]
    Config(String),

    /// Snapshot cache write failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// Desktop notification could not be shown.
    #[error("notify error: {0}")]
    Notify(String),

    /// Filesystem watch setup or delivery failed.
    #[error("watch error: {0}")]
    Watch(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Outcome of a failed pipeline lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The retry budget ran out while the provider kept rate limiting.
    #[error("rate limited: retry budget of {budget:?} exhausted: {last}")]
    RateLimited {
        /// Elapsed-time ceiling that was exceeded.
        budget: Duration,
        /// Last provider error text.
        last: String,
    },

    /// The retry budget ran out on retryable failures.
    #[error("transient failure: retry budget of {budget:?} exhausted: {last}")]
    Transient {
        /// Elapsed-time ceiling that was exceeded.
        budget: Duration,
        /// Last provider error text.
        last: String,
    },

    /// The provider rejected the request; retrying would not help.
    #[error("terminal failure: {0}")]
    Terminal(String),

    /// The caller cancelled the lookup.
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Returns `true` when the lookup stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
