//! Client configuration with sensible defaults.

use crate::error::ApiError;
use std::time::Duration;

/// Default GitLab instance.
pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";

/// Connection settings for a GitLab instance.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Instance root, e.g. `https://gitlab.example.com`. Trailing slashes
    /// are ignored.
    pub base_url: String,
    /// Personal or project access token sent as `PRIVATE-TOKEN`.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ApiConfig {
    /// Create a config for the given instance and token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL without trailing slashes.
    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Validates this configuration.
    ///
    /// Checks:
    /// - `base_url` parses as an absolute http(s) URL
    /// - `timeout` is non-zero
    pub fn validate(&self) -> Result<(), ApiError> {
        let parsed = url::Url::parse(self.trimmed_base_url())
            .map_err(|e| ApiError::Config(format!("invalid base_url '{}': {e}", self.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "base_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(ApiError::Config("timeout must be greater than 0".into()));
        }
        Ok(())
    }
}
