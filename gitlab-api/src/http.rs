//! Shared HTTP client construction.

use crate::config::ApiConfig;
use crate::error::ApiError;
use std::time::Duration;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("ci-watcher/", env!("CARGO_PKG_VERSION"));

/// Build a [`reqwest::Client`] for talking to a GitLab instance.
///
/// The client applies the configured per-request timeout and a short connect
/// timeout so an unreachable instance fails fast.
///
/// # Errors
///
/// Returns [`ApiError::Http`] if the client cannot be constructed.
pub fn build_client(config: &ApiConfig) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ApiError::Http(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_with_default_config() {
        let client = build_client(&ApiConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn user_agent_names_the_tool() {
        assert!(USER_AGENT.starts_with("ci-watcher/"));
    }
}
