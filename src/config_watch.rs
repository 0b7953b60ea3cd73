//! Hot reload of the target list.
//!
//! Watches the directory holding the config file (editors often replace the
//! file rather than writing it in place), filters events down to that file,
//! and collapses bursts into a single reload once the file has been quiet
//! for the debounce window. A reload swaps the scheduler's target list and
//! runs one extra pass.

use crate::config::WatcherConfig;
use crate::error::{Result, WatchError};
use crate::model::TargetRef;
use crate::scheduler::Scheduler;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Quiet period before a burst of events turns into a reload.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Where reloaded targets come from.
pub trait TargetSource: Send + Sync {
    /// File whose changes should trigger a reload.
    fn path(&self) -> &Path;

    /// Re-read the source and return the enabled targets in order.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot be read or parsed.
    fn enabled_targets(&self) -> Result<Vec<TargetRef>>;
}

/// [`TargetSource`] backed by the TOML config file plus environment
/// overrides.
#[derive(Debug, Clone)]
pub struct ConfigFileSource {
    path: PathBuf,
}

impl ConfigFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TargetSource for ConfigFileSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn enabled_targets(&self) -> Result<Vec<TargetRef>> {
        Ok(WatcherConfig::load(&self.path)?.enabled_targets())
    }
}

/// Feeds config file changes into a [`Scheduler`].
pub struct ConfigWatchBridge {
    source: Arc<dyn TargetSource>,
    scheduler: Arc<Scheduler>,
    debounce: Duration,
}

impl ConfigWatchBridge {
    pub fn new(source: Arc<dyn TargetSource>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            source,
            scheduler,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Returns `None` (after logging) when the platform
    /// watcher cannot be set up; polling then simply continues with the
    /// targets loaded at startup.
    pub fn spawn(self, cancel: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = match self.start_watcher(tx) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "config hot reload unavailable");
                return None;
            }
        };
        info!(path = %self.source.path().display(), "watching config for changes");

        Some(tokio::spawn(async move {
            let _watcher = watcher;
            self.run_events(rx, cancel).await;
        }))
    }

    fn start_watcher(
        &self,
        tx: mpsc::UnboundedSender<notify::Result<Event>>,
    ) -> Result<notify::RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |event| {
            if tx.send(event).is_err() {
                debug!("config event dropped because the bridge has stopped");
            }
        })
        .map_err(|e| WatchError::Watch(format!("failed to create watcher: {e}")))?;

        let dir = watch_dir(self.source.path());
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Watch(format!("failed to watch '{}': {e}", dir.display())))?;
        Ok(watcher)
    }

    /// Consume watcher events until `cancel` fires or the channel closes.
    pub async fn run_events(
        &self,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        cancel: CancellationToken,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = wait_until(deadline) => {
                    deadline = None;
                    self.reload(&cancel).await;
                }
                event = events.recv() => match event {
                    Some(Ok(event)) if self.is_relevant(&event) => {
                        debug!(kind = ?event.kind, "config change detected");
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(error = %e, "config watcher error"),
                    None => break,
                },
            }
        }
    }

    /// Reload targets, hand them to the scheduler and run one pass.
    ///
    /// Returns `false` when the source could not be read; the previous
    /// target list stays in effect.
    pub async fn reload(&self, cancel: &CancellationToken) -> bool {
        let targets = match self.source.enabled_targets() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "config reload failed; keeping previous targets");
                return false;
            }
        };
        if targets.is_empty() {
            warn!("config reloaded with no enabled projects");
        }
        self.scheduler.update_refs(targets);
        self.scheduler.tick(cancel).await;
        true
    }

    fn is_relevant(&self, event: &Event) -> bool {
        let kind_matches = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
        );
        let Some(name) = self.source.path().file_name() else {
            return false;
        };
        kind_matches && event.paths.iter().any(|p| p.file_name() == Some(name))
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::cache::SnapshotSink;
    use crate::detector::ChangeDetector;
    use crate::error::FetchError;
    use crate::fetcher::PipelineSource;
    use crate::model::{PipelineObservation, Snapshot};
    use crate::notifier::NoopNotifier;
    use async_trait::async_trait;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RenameMode};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        path: PathBuf,
        next: Mutex<Result<Vec<TargetRef>>>,
        loads: AtomicUsize,
    }

    impl FakeSource {
        fn new(next: Result<Vec<TargetRef>>) -> Self {
            Self {
                path: PathBuf::from("/etc/ci-watcher/config.toml"),
                next: Mutex::new(next),
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl TargetSource for FakeSource {
        fn path(&self) -> &Path {
            &self.path
        }

        fn enabled_targets(&self) -> Result<Vec<TargetRef>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match &*self.next.lock().unwrap() {
                Ok(t) => Ok(t.clone()),
                Err(e) => Err(WatchError::Config(e.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct Calls(Mutex<Vec<TargetRef>>);

    #[async_trait]
    impl PipelineSource for Calls {
        async fn fetch(
            &self,
            _: &CancellationToken,
            target: &TargetRef,
        ) -> std::result::Result<PipelineObservation, FetchError> {
            self.0.lock().unwrap().push(target.clone());
            Ok(PipelineObservation::none_yet(target.git_ref.clone()))
        }
    }

    struct NullSink;

    #[async_trait]
    impl SnapshotSink for NullSink {
        async fn write(&self, _: &Snapshot) -> Result<()> {
            Ok(())
        }
    }

    fn a() -> TargetRef {
        TargetRef::new(1, "main")
    }

    fn b() -> TargetRef {
        TargetRef::new(2, "main")
    }

    fn setup(next: Result<Vec<TargetRef>>) -> (Arc<FakeSource>, Arc<Calls>, Arc<Scheduler>) {
        let source = Arc::new(FakeSource::new(next));
        let calls = Arc::new(Calls::default());
        let detector = ChangeDetector::new(
            Arc::clone(&calls) as Arc<dyn PipelineSource>,
            Arc::new(NullSink),
            Arc::new(NoopNotifier),
        );
        let scheduler = Arc::new(Scheduler::new(
            detector,
            vec![a(), b()],
            Duration::from_secs(20),
        ));
        (source, calls, scheduler)
    }

    fn modify(path: &str) -> notify::Result<Event> {
        Ok(Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.into()))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_triggers_one_reload() {
        let (source, calls, scheduler) = setup(Ok(vec![b()]));
        let bridge = ConfigWatchBridge::new(
            Arc::clone(&source) as Arc<dyn TargetSource>,
            Arc::clone(&scheduler),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { bridge.run_events(rx, cancel).await }
        });

        for _ in 0..5 {
            tx.send(modify("/etc/ci-watcher/config.toml")).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(*scheduler.targets(), vec![b()]);
        assert_eq!(*calls.0.lock().unwrap(), vec![b()]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_files_and_access_events_are_ignored() {
        let (source, _calls, scheduler) = setup(Ok(vec![b()]));
        let bridge = ConfigWatchBridge::new(
            Arc::clone(&source) as Arc<dyn TargetSource>,
            scheduler,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { bridge.run_events(rx, cancel).await }
        });

        tx.send(modify("/etc/ci-watcher/other.toml")).unwrap();
        tx.send(Ok(Event::new(EventKind::Access(AccessKind::Any))
            .add_path("/etc/ci-watcher/config.toml".into())))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn create_and_rename_events_count() {
        let (source, _calls, scheduler) = setup(Ok(vec![a()]));
        let bridge = ConfigWatchBridge::new(
            Arc::clone(&source) as Arc<dyn TargetSource>,
            scheduler,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { bridge.run_events(rx, cancel).await }
        });

        tx.send(Ok(Event::new(EventKind::Create(CreateKind::File))
            .add_path("/etc/ci-watcher/config.toml".into())))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(Ok(Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path("/etc/ci-watcher/config.toml".into())))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_targets() {
        let (source, calls, scheduler) =
            setup(Err(WatchError::Config("expected `=`".into())));
        let bridge = ConfigWatchBridge::new(
            Arc::clone(&source) as Arc<dyn TargetSource>,
            Arc::clone(&scheduler),
        );

        assert!(!bridge.reload(&CancellationToken::new()).await);
        assert_eq!(*scheduler.targets(), vec![a(), b()]);
        assert!(calls.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_reload_is_accepted() {
        let (source, calls, scheduler) = setup(Ok(Vec::new()));
        let bridge = ConfigWatchBridge::new(
            Arc::clone(&source) as Arc<dyn TargetSource>,
            Arc::clone(&scheduler),
        );

        assert!(bridge.reload(&CancellationToken::new()).await);
        assert!(scheduler.targets().is_empty());
        assert!(calls.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_channel_ends_the_loop() {
        let (source, _calls, scheduler) = setup(Ok(vec![a()]));
        let bridge = ConfigWatchBridge::new(source as Arc<dyn TargetSource>, scheduler);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        let run = bridge.run_events(rx, CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("loop should end when the channel closes");
    }

    #[test]
    fn config_file_source_reads_enabled_targets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[poll.projects]]\nproject_id = 1\nref = \"main\"\n\n\
             [[poll.projects]]\nproject_id = 2\nref = \"dev\"\nenabled = false\n",
        )
        .unwrap();
        let source = ConfigFileSource::new(&path);
        let targets = source.enabled_targets().unwrap();
        // Project variables in the environment replace the file's list.
        if !env_replaces_projects() {
            assert_eq!(targets, vec![a()]);
        }
    }

    fn env_replaces_projects() -> bool {
        std::env::var_os("GITLAB_PROJECTS").is_some()
            || std::env::var_os("GITLAB_PROJECT_ID").is_some()
    }

    #[tokio::test]
    async fn spawn_without_watchable_dir_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let (_source, calls, scheduler) = setup(Ok(vec![a()]));
        let source = Arc::new(ConfigFileSource::new(
            dir.path().join("missing").join("config.toml"),
        ));
        let bridge = ConfigWatchBridge::new(source, Arc::clone(&scheduler));

        assert!(bridge.spawn(CancellationToken::new()).is_none());
        assert_eq!(*scheduler.targets(), vec![a(), b()]);
        assert!(calls.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_replaced_by_rename_reloads_once() {
        if env_replaces_projects() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[poll.projects]]\nproject_id = 1\n").unwrap();

        let (_source, calls, scheduler) = setup(Ok(vec![a()]));
        let cancel = CancellationToken::new();
        let handle = ConfigWatchBridge::new(
            Arc::new(ConfigFileSource::new(&path)),
            Arc::clone(&scheduler),
        )
        .with_debounce(Duration::from_millis(100))
        .spawn(cancel.clone())
        .expect("watcher should start on an existing directory");

        let staged = dir.path().join("config.toml.new");
        std::fs::write(&staged, "[[poll.projects]]\nproject_id = 2\n").unwrap();
        std::fs::rename(&staged, &path).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while *scheduler.targets() != vec![b()] {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("reload should swap in the new target list");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*calls.0.lock().unwrap(), vec![b()]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn watch_dir_falls_back_to_cwd() {
        assert_eq!(watch_dir(Path::new("config.toml")), PathBuf::from("."));
        assert_eq!(watch_dir(Path::new("/a/b.toml")), PathBuf::from("/a"));
    }
}
