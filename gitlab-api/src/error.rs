//! Error types for the gitlab-api crate.
//!
//! Every non-success HTTP outcome is classified here so callers can decide
//! whether to retry without inspecting raw status codes. Tokens never appear
//! in error messages.

use std::time::Duration;

/// Errors returned by a single GitLab API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server answered `429 Too Many Requests`.
    ///
    /// `retry_after` carries the `Retry-After` hint when the server sent a
    /// positive number of seconds.
    #[error("rate limited by GitLab{}", retry_after_suffix(*.retry_after))]
    RateLimited {
        /// Server-provided wait hint.
        retry_after: Option<Duration>,
    },

    /// The server answered with a 5xx status.
    #[error("GitLab server error: HTTP {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The server answered with any other non-success status.
    #[error("GitLab request rejected: HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The response body was not the expected JSON shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

fn retry_after_suffix(retry_after: Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl ApiError {
    /// Returns `true` when repeating the same request later may succeed.
    ///
    /// Rate limiting, 5xx responses and transport failures are transient.
    /// Any other status, malformed bodies and configuration problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Http(_)
        )
    }

    /// Returns the server's wait hint for rate-limited responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Convenience type alias for gitlab-api results.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_rate_limited_with_hint() {
        let err = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.to_string(), "rate limited by GitLab (retry after 2s)");
    }

    #[test]
    fn display_rate_limited_without_hint() {
        let err = ApiError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "rate limited by GitLab");
    }

    #[test]
    fn display_server() {
        let err = ApiError::Server { status: 503 };
        assert_eq!(err.to_string(), "GitLab server error: HTTP 503");
    }

    #[test]
    fn transient_classification() {
        assert!(ApiError::RateLimited { retry_after: None }.is_transient());
        assert!(ApiError::Server { status: 500 }.is_transient());
        assert!(ApiError::Http("connection reset".into()).is_transient());
        assert!(!ApiError::Status { status: 404 }.is_transient());
        assert!(!ApiError::Decode("expected array".into()).is_transient());
        assert!(!ApiError::Config("empty base url".into()).is_transient());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let limited = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ApiError::Server { status: 502 }.retry_after(), None);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ApiError>();
    }
}
