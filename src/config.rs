//! Configuration for the watcher.
//!
//! Loaded from a TOML file, then overlaid with environment variables:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `GITLAB_BASE_URL` | `gitlab.base_url` |
//! | `GITLAB_TOKEN` | `gitlab.token` |
//! | `GITLAB_TIMEOUT` | `gitlab.timeout` (duration, e.g. `10s`, `1500ms`) |
//! | `INTERVAL` | `poll.interval` (duration) |
//! | `CACHE_PATH` | `cache.path` |
//! | `GITLAB_PROJECTS` | replaces `poll.projects` with `id:ref,id:ref` |
//! | `GITLAB_PROJECT_ID` / `GITLAB_REF` | single project when `GITLAB_PROJECTS` is unset |

use crate::backoff::BackoffPolicy;
use crate::error::{Result, WatchError};
use crate::model::TargetRef;
use crate::watch_dirs;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound applied to every `[retry]` duration.
const MAX_RETRY_MS: u64 = 60 * 60 * 1000;

/// Top-level watcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// GitLab connection settings.
    pub gitlab: GitlabConfig,
    /// Polling schedule and targets.
    pub poll: PollConfig,
    /// Snapshot cache settings.
    pub cache: CacheConfig,
    /// Desktop notification settings.
    pub notify: NotifyConfig,
    /// Retry policy for remote lookups.
    pub retry: RetryConfig,
}

/// GitLab connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitlabConfig {
    /// Instance root URL.
    pub base_url: String,
    /// Access token. Usually supplied through `GITLAB_TOKEN`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Per-request timeout.
    #[serde(with = "duration_text")]
    pub timeout: Duration,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            base_url: gitlab_api::config::DEFAULT_BASE_URL.to_owned(),
            token: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Polling schedule and targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between poll passes.
    #[serde(with = "duration_text")]
    pub interval: Duration,
    /// Marker file whose presence pauses polling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_file: Option<PathBuf>,
    /// Tracked projects.
    pub projects: Vec<ProjectEntry>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            pause_file: None,
            projects: Vec::new(),
        }
    }
}

/// One configured `(project, ref)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// GitLab project id.
    pub project_id: u64,
    /// Branch or tag to follow.
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    /// Whether this entry is polled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Human-friendly name used by `enable`/`disable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_ref() -> String {
    "main".to_owned()
}

fn default_enabled() -> bool {
    true
}

impl ProjectEntry {
    /// Create an enabled, unnamed entry.
    pub fn new(project_id: u64, git_ref: impl Into<String>) -> Self {
        Self {
            project_id,
            git_ref: git_ref.into(),
            enabled: true,
            name: None,
        }
    }

    /// The polling target this entry describes.
    pub fn target(&self) -> TargetRef {
        TargetRef::new(self.project_id, self.git_ref.clone())
    }
}

/// Snapshot cache settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Snapshot file path. Defaults to [`watch_dirs::status_file`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Desktop notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Show desktop notifications at all.
    pub enabled: bool,
    /// Treat a failing `notify-send` as success.
    pub soft: bool,
    /// Application name shown by the notification daemon.
    pub app_name: String,
    /// `low`, `normal` or `critical`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    /// Expiry in milliseconds; 0 leaves it to the daemon.
    pub expire_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            soft: true,
            app_name: "ci-watcher".to_owned(),
            urgency: None,
            expire_ms: 0,
        }
    }
}

/// Retry policy for remote lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff interval in milliseconds.
    pub initial_interval_ms: u64,
    /// Cap for a single backoff interval in milliseconds.
    pub max_interval_ms: u64,
    /// Total time budget for one lookup in milliseconds.
    pub max_elapsed_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 300,
            max_interval_ms: 2_000,
            max_elapsed_ms: 5_000,
        }
    }
}

impl WatcherConfig {
    /// Load the file (if present), apply environment overrides and fill in
    /// defaults for unset values.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file_or_default(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        config.normalize();
        Ok(config)
    }

    /// Parse the file exactly as written, with no environment overlay.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] on read or parse failure.
    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(WatchError::Config(format!(
                    "failed to read config file '{}': {e}",
                    path.display()
                )));
            }
        };
        toml::from_str(&content).map_err(|e| {
            WatchError::Config(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })
    }

    /// Overlay values from an environment lookup.
    ///
    /// `lookup` returns `None` for unset (or empty) variables. Malformed
    /// values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GITLAB_BASE_URL") {
            self.gitlab.base_url = v;
        }
        if let Some(v) = lookup("GITLAB_TOKEN") {
            self.gitlab.token = v;
        }
        if let Some(d) = lookup("GITLAB_TIMEOUT").and_then(|v| parse_duration(&v)) {
            self.gitlab.timeout = d;
        }
        if let Some(d) = lookup("INTERVAL").and_then(|v| parse_duration(&v)) {
            self.poll.interval = d;
        }
        if let Some(v) = lookup("CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(v));
        }

        if let Some(list) = lookup("GITLAB_PROJECTS") {
            let projects = parse_project_list(&list);
            if !projects.is_empty() {
                self.poll.projects = projects;
            }
        } else if let Some(id) = lookup("GITLAB_PROJECT_ID").and_then(|v| v.trim().parse().ok()) {
            let git_ref = lookup("GITLAB_REF").unwrap_or_else(default_ref);
            self.poll.projects = vec![ProjectEntry::new(id, git_ref)];
        }
    }

    /// Replace zero/empty values with defaults and expand `~/` in paths.
    pub fn normalize(&mut self) {
        if self.gitlab.base_url.trim().is_empty() {
            self.gitlab.base_url = GitlabConfig::default().base_url;
        }
        if self.gitlab.timeout.is_zero() {
            self.gitlab.timeout = GitlabConfig::default().timeout;
        }
        if self.poll.interval.is_zero() {
            self.poll.interval = PollConfig::default().interval;
        }
        self.cache.path = Some(watch_dirs::expand_home(&self.cache_path()));
        self.poll.pause_file = Some(watch_dirs::expand_home(&self.pause_file()));
    }

    /// Checks that a polling run can start.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when the token is missing, no project
    /// is configured, or every project is disabled.
    pub fn validate_for_run(&self) -> Result<()> {
        if self.gitlab.token.trim().is_empty() {
            return Err(WatchError::Config("GITLAB_TOKEN is required".into()));
        }
        if self.poll.projects.is_empty() {
            return Err(WatchError::Config(
                "no projects configured (file or environment)".into(),
            ));
        }
        if self.enabled_targets().is_empty() {
            return Err(WatchError::Config("no enabled projects".into()));
        }
        Ok(())
    }

    /// Enabled targets in configuration order.
    pub fn enabled_targets(&self) -> Vec<TargetRef> {
        self.poll
            .projects
            .iter()
            .filter(|p| p.enabled)
            .map(ProjectEntry::target)
            .collect()
    }

    /// Set `enabled` on every project named `name`.
    ///
    /// Returns `true` if any entry actually changed.
    pub fn set_enabled_by_name(&mut self, name: &str, enabled: bool) -> bool {
        let mut changed = false;
        for project in &mut self.poll.projects {
            if project.name.as_deref() == Some(name) && project.enabled != enabled {
                project.enabled = enabled;
                changed = true;
            }
        }
        changed
    }

    /// Time between passes; never zero.
    pub fn poll_interval(&self) -> Duration {
        if self.poll.interval.is_zero() {
            PollConfig::default().interval
        } else {
            self.poll.interval
        }
    }

    /// Effective snapshot path.
    pub fn cache_path(&self) -> PathBuf {
        self.cache.path.clone().unwrap_or_else(watch_dirs::status_file)
    }

    /// Effective pause marker path.
    pub fn pause_file(&self) -> PathBuf {
        self.poll
            .pause_file
            .clone()
            .unwrap_or_else(watch_dirs::pause_file)
    }

    /// Connection settings for the GitLab client.
    pub fn api_config(&self) -> gitlab_api::ApiConfig {
        gitlab_api::ApiConfig::new(self.gitlab.base_url.clone(), self.gitlab.token.clone())
            .with_timeout(self.gitlab.timeout)
    }

    /// Backoff policy built from `[retry]`. Each value is clamped to one
    /// hour.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let millis = |ms: u64| Duration::from_millis(ms.min(MAX_RETRY_MS));
        BackoffPolicy {
            initial_interval: millis(self.retry.initial_interval_ms.max(1)),
            max_interval: millis(self.retry.max_interval_ms.max(1)),
            max_elapsed: millis(self.retry.max_elapsed_ms),
            ..BackoffPolicy::default()
        }
    }

    /// Load the file without the environment overlay, apply `change` and
    /// save the result if `change` returns `true`.
    ///
    /// An exclusive lock on `<path>.lock` is held from load to save, so
    /// concurrent updates from other processes are serialized rather than
    /// lost.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if the lock cannot be taken or the file
    /// cannot be read, parsed or written.
    pub fn update_file<F>(path: &Path, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Self) -> bool,
    {
        let _lock = ConfigLock::acquire(path)?;
        let mut config = Self::from_file_or_default(path)?;
        if !change(&mut config) {
            return Ok(false);
        }
        config.save_to_file(path)?;
        Ok(true)
    }

    /// Write the configuration atomically (temp file → fsync → rename).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] on serialization or write failure.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| WatchError::Config(format!("failed to serialize config: {e}")))?;
        write_text_atomic(path, &text)
    }
}

/// Exclusive advisory lock on `<config>.lock`, released on drop.
struct ConfigLock {
    _file: File,
}

impl ConfigLock {
    fn acquire(config_path: &Path) -> Result<Self> {
        ensure_parent_dir(config_path)?;
        let path = lock_path(config_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                WatchError::Config(format!("failed to open lock '{}': {e}", path.display()))
            })?;
        file.lock().map_err(|e| {
            WatchError::Config(format!("failed to lock '{}': {e}", path.display()))
        })?;
        Ok(Self { _file: file })
    }
}

fn lock_path(config_path: &Path) -> PathBuf {
    let mut name = config_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn ensure_parent_dir(path: &Path) -> Result<&Path> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(Path::new("."));
    };
    std::fs::create_dir_all(parent).map_err(|e| {
        WatchError::Config(format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        ))
    })?;
    Ok(parent)
}

fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    let dir = ensure_parent_dir(path)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        WatchError::Config(format!(
            "failed to create temp file in '{}': {e}",
            dir.display()
        ))
    })?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| WatchError::Config(format!("failed to write temp file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| WatchError::Config(format!("failed to sync temp file: {e}")))?;

    tmp.persist(path).map_err(|e| {
        WatchError::Config(format!(
            "failed to replace '{}': {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}

/// Text form of config durations: `"20s"`, `"500ms"`, or an integer number
/// of seconds.
mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if value.subsec_nanos() == 0 {
            format!("{}s", value.as_secs())
        } else {
            format!("{}ms", value.as_millis())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => super::parse_duration(&text)
                .ok_or_else(|| de::Error::custom(format!("invalid duration '{text}'"))),
        }
    }
}

/// Parse `id:ref,id:ref`. Malformed items are skipped.
fn parse_project_list(list: &str) -> Vec<ProjectEntry> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let (id, git_ref) = item.split_once(':')?;
            let id = id.trim().parse().ok()?;
            let git_ref = git_ref.trim();
            (!git_ref.is_empty()).then(|| ProjectEntry::new(id, git_ref))
        })
        .collect()
}

/// Parse `500ms`, `10s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (digits, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.checked_mul(60)?),
        "h" => Duration::from_secs(value.checked_mul(3600)?),
        _ => return None,
    };
    (!duration.is_zero()).then_some(duration)
}
