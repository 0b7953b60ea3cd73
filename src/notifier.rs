//! Desktop notifications.

use crate::config::NotifyConfig;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use tracing::debug;

/// Receiver of change notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show one notification. `link` may be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be shown. Callers treat
    /// this as best-effort.
    async fn notify(&self, title: &str, body: &str, link: &str) -> Result<()>;
}

/// Notifier used when notifications are switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, title: &str, _body: &str, _link: &str) -> Result<()> {
        debug!(title, "notifications disabled");
        Ok(())
    }
}

/// Shows notifications through `notify-send`.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
    urgency: Option<String>,
    expire_ms: u64,
    soft: bool,
}

impl DesktopNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            program: "notify-send".to_owned(),
            app_name: config.app_name.clone(),
            urgency: config.urgency.clone().filter(|u| !u.trim().is_empty()),
            expire_ms: config.expire_ms,
            soft: config.soft,
        }
    }

    /// Use a different executable with the same argument convention.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, title: &str, body: &str, link: &str) -> Vec<String> {
        let mut args = vec![format!("--app-name={}", self.app_name)];
        if let Some(urgency) = &self.urgency {
            args.push(format!("--urgency={urgency}"));
        }
        if self.expire_ms > 0 {
            args.push(format!("--expire-time={}", self.expire_ms));
        }
        args.push(title.to_owned());
        args.push(body_with_link(body, link));
        args
    }
}

fn body_with_link(body: &str, link: &str) -> String {
    let link = link.trim();
    match (body.is_empty(), link.is_empty()) {
        (_, true) => body.to_owned(),
        (true, false) => link.to_owned(),
        (false, false) => format!("{body}\n{link}"),
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, body: &str, link: &str) -> Result<()> {
        let outcome = tokio::process::Command::new(&self.program)
            .args(self.args(title, body, link))
            .kill_on_drop(true)
            .status()
            .await;

        let failure = match outcome {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => format!("{} exited with {status}", self.program),
            Err(e) => format!("failed to run {}: {e}", self.program),
        };
        if self.soft {
            debug!(error = %failure, "notification not shown (soft mode)");
            return Ok(());
        }
        Err(WatchError::Notify(failure))
    }
}
