//! # gitlab-api
//!
//! Minimal typed client for the GitLab pipelines REST API.
//!
//! ## Design
//!
//! - One method per endpoint, one HTTP request per call
//! - Responses are classified into [`ApiError`] variants so callers can tell
//!   transient failures (rate limiting, 5xx, transport) from terminal ones
//! - No retry policy lives here; `ci-watcher` layers backoff on top
//!
//! ## Security
//!
//! - The access token is only ever sent as the `PRIVATE-TOKEN` header
//! - Tokens never appear in logs or error messages

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod types;

pub use client::GitlabClient;
pub use config::ApiConfig;
pub use error::{ApiError, Result};
pub use types::Pipeline;
