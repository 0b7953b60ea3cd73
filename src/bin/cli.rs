//! CLI binary for ci-watcher.

use anyhow::Context;
use ci_watcher::cache::FsSnapshotCache;
use ci_watcher::config::ProjectEntry;
use ci_watcher::config_watch::{ConfigFileSource, ConfigWatchBridge};
use ci_watcher::detector::ChangeDetector;
use ci_watcher::fetcher::RemoteStatusFetcher;
use ci_watcher::notifier::{DesktopNotifier, NoopNotifier, Notifier};
use ci_watcher::pause::MarkerFilePause;
use ci_watcher::{Scheduler, WatcherConfig, watch_dirs};
use clap::{Args, Parser, Subcommand};
use gitlab_api::GitlabClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// GitLab CI watcher: polling, desktop notifications and a status snapshot.
#[derive(Parser)]
#[command(name = "ci-watcher", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the polling scheduler until interrupted.
    Run,

    /// List configured projects.
    List(ListArgs),

    /// Enable every project with the given name.
    Enable { name: String },

    /// Disable every project with the given name.
    Disable { name: String },

    /// Pause polling (creates the pause marker).
    Pause,

    /// Resume polling (removes the pause marker).
    Resume,

    /// Print the version.
    Version,
}

#[derive(Args)]
struct ListArgs {
    /// Show only enabled projects.
    #[arg(long, conflicts_with = "disabled")]
    enabled: bool,

    /// Show only disabled projects.
    #[arg(long)]
    disabled: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ci_watcher=info,gitlab_api=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(watch_dirs::config_file);

    match cli.command {
        Command::Run => run(&config_path).await,
        Command::List(args) => list(&config_path, &args),
        Command::Enable { name } => set_enabled(&config_path, &name, true),
        Command::Disable { name } => set_enabled(&config_path, &name, false),
        Command::Pause => {
            let marker = pause_marker(&config_path)?;
            marker
                .pause()
                .with_context(|| format!("failed to create {}", marker.path().display()))?;
            println!("paused ({})", marker.path().display());
            Ok(())
        }
        Command::Resume => {
            let marker = pause_marker(&config_path)?;
            marker
                .resume()
                .with_context(|| format!("failed to remove {}", marker.path().display()))?;
            println!("resumed");
            Ok(())
        }
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = WatcherConfig::load(config_path)?;
    config.validate_for_run()?;

    let client = GitlabClient::new(config.api_config())?;
    let fetcher = RemoteStatusFetcher::new(Arc::new(client)).with_policy(config.backoff_policy());
    let notifier: Arc<dyn Notifier> = if config.notify.enabled {
        Arc::new(DesktopNotifier::new(&config.notify))
    } else {
        Arc::new(NoopNotifier)
    };
    let cache_path = config.cache_path();
    let detector = ChangeDetector::new(
        Arc::new(fetcher),
        Arc::new(FsSnapshotCache::new(cache_path.clone())),
        notifier,
    );

    let pause_path = config.pause_file();
    let targets = config.enabled_targets();
    let scheduler = Arc::new(
        Scheduler::new(detector, targets, config.poll_interval())
            .with_pause_signal(Arc::new(MarkerFilePause::new(pause_path.clone()))),
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let source = Arc::new(ConfigFileSource::new(config_path));
    let bridge = ConfigWatchBridge::new(source, Arc::clone(&scheduler)).spawn(cancel.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        projects = scheduler.targets().len(),
        interval_ms = config.poll_interval().as_millis() as u64,
        cache = %cache_path.display(),
        gitlab = %config.gitlab.base_url,
        pause_file = %pause_path.display(),
        "start"
    );

    scheduler.run(cancel.clone()).await;
    if let Some(handle) = bridge {
        let _ = handle.await;
    }
    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown requested");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn list(config_path: &Path, args: &ListArgs) -> anyhow::Result<()> {
    let config = WatcherConfig::load(config_path)?;
    let items: Vec<&ProjectEntry> = config
        .poll
        .projects
        .iter()
        .filter(|p| !(args.enabled && !p.enabled) && !(args.disabled && p.enabled))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    let name_width = items
        .iter()
        .map(|p| p.name.as_deref().unwrap_or("(unnamed)").len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    println!("{:<name_width$}  {:<10}  {:<20}  ENABLED", "NAME", "PROJECT_ID", "REF");
    for p in items {
        println!(
            "{:<name_width$}  {:<10}  {:<20}  {}",
            p.name.as_deref().unwrap_or("(unnamed)"),
            p.project_id,
            p.git_ref,
            p.enabled
        );
    }
    Ok(())
}

fn set_enabled(config_path: &Path, name: &str, enabled: bool) -> anyhow::Result<()> {
    let verb = if enabled { "enabled" } else { "disabled" };
    let changed =
        WatcherConfig::update_file(config_path, |config| config.set_enabled_by_name(name, enabled))?;

    if !changed {
        println!("no change (project {name:?} already {verb} or not found)");
        return Ok(());
    }
    println!("{verb}: {name}");
    Ok(())
}

fn pause_marker(config_path: &Path) -> anyhow::Result<MarkerFilePause> {
    let config = WatcherConfig::load(config_path)?;
    Ok(MarkerFilePause::new(config.pause_file()))
}
