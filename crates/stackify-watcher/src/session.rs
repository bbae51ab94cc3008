//! Watch session lifecycle.
//!
//! A [`WatchController`] is Idle or Watching. `start` always stops first,
//! so there is never more than one set of OS handles per controller.
//! While Watching, one dispatcher task turns debounced path batches into
//! [`FileChange`] triggers and hands each one to the engine's
//! [`ChangeHandler`] on its own task.

use crate::error::WatchError;
use crate::watcher::{FileChange, FileWatcher, DEFAULT_DEBOUNCE};
use async_trait::async_trait;
use stackify_core::GlobSpec;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Reacts to triggers. Implemented by each engine.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    /// `origin` is the watched root the change was observed under.
    async fn on_change(&self, origin: &Path, change: FileChange);
}

/// A directory to watch and the globs that decide which of its paths count.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    pub root: PathBuf,
    pub spec: GlobSpec,
}

impl WatchRoot {
    pub fn new(root: impl Into<PathBuf>, spec: GlobSpec) -> Self {
        Self {
            root: root.into(),
            spec,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,

    /// When false, starting a session reports every matched file as Created.
    pub ignore_initial: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            ignore_initial: true,
        }
    }
}

/// Remembers which matched files exist under one root, so a bare
/// "something happened to this path" can be named.
struct ChangeTracker {
    watch_root: WatchRoot,
    known: HashSet<PathBuf>,
}

impl ChangeTracker {
    fn new(watch_root: WatchRoot, existing: Vec<PathBuf>) -> Self {
        Self {
            watch_root,
            known: existing.into_iter().collect(),
        }
    }

    fn classify(&mut self, path: PathBuf) -> Vec<FileChange> {
        let spec = &self.watch_root.spec;

        // A directory moved or unpacked into the root is reported by its
        // own path only, so its files have to be discovered here.
        if path.is_dir() {
            return spec
                .expand_within(&path)
                .into_iter()
                .filter(|file| self.known.insert(file.clone()))
                .map(FileChange::Created)
                .collect();
        }

        if path.is_file() {
            if !spec.matches(&path) {
                return Vec::new();
            }
            return if self.known.insert(path.clone()) {
                vec![FileChange::Created(path)]
            } else {
                vec![FileChange::Modified(path)]
            };
        }

        if self.known.remove(&path) {
            return vec![FileChange::Deleted(path)];
        }

        // A removed directory may be reported by its own path only.
        let children: Vec<PathBuf> = self
            .known
            .iter()
            .filter(|known| known.starts_with(&path))
            .cloned()
            .collect();
        if !children.is_empty() {
            return children
                .into_iter()
                .map(|child| {
                    self.known.remove(&child);
                    FileChange::Deleted(child)
                })
                .collect();
        }

        if spec.matches(&path) {
            vec![FileChange::Deleted(path)]
        } else {
            Vec::new()
        }
    }
}

struct WatchSession {
    watchers: Vec<FileWatcher>,
    dispatcher: JoinHandle<()>,
}

/// Owns at most one watch session.
pub struct WatchController {
    session: Mutex<Option<WatchSession>>,
    stopped: watch::Sender<bool>,
    handles: AtomicUsize,
}

impl WatchController {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(true);
        Self {
            session: Mutex::new(None),
            stopped,
            handles: AtomicUsize::new(0),
        }
    }

    /// Starts a session over `roots`, replacing any running one.
    pub async fn start(
        &self,
        roots: Vec<WatchRoot>,
        options: WatchOptions,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<(), WatchError> {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;

        let (tx, rx) = mpsc::unbounded_channel::<(usize, Vec<PathBuf>)>();
        let mut watchers = Vec::with_capacity(roots.len());
        let mut trackers = Vec::with_capacity(roots.len());

        for (index, watch_root) in roots.into_iter().enumerate() {
            let existing = watch_root.spec.expand()?;

            let sender = tx.clone();
            let watcher = FileWatcher::new(&watch_root.root, options.debounce, move |paths| {
                let _ = sender.send((index, paths));
            })?;
            watchers.push(watcher);

            if !options.ignore_initial {
                for path in &existing {
                    spawn_handler(&handler, &watch_root.root, FileChange::Created(path.clone()));
                }
            }
            trackers.push(ChangeTracker::new(watch_root, existing));
        }
        drop(tx);

        let dispatcher = tokio::spawn(dispatch(rx, trackers, handler));

        self.handles.store(watchers.len(), Ordering::SeqCst);
        self.stopped.send_replace(false);
        info!("Watch session started ({} roots)", watchers.len());

        *session = Some(WatchSession {
            watchers,
            dispatcher,
        });
        Ok(())
    }

    /// Stops the current session. Safe to call when nothing is running.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
    }

    async fn teardown(&self, session: &mut Option<WatchSession>) {
        if let Some(WatchSession {
            watchers,
            dispatcher,
        }) = session.take()
        {
            drop(watchers);
            dispatcher.abort();
            let _ = dispatcher.await;
            info!("Watch session stopped");
        }
        self.handles.store(0, Ordering::SeqCst);
        self.stopped.send_replace(true);
    }

    /// Resolves once no session is running.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_watching(&self) -> bool {
        !*self.stopped.borrow()
    }

    /// Number of live OS watch handles.
    pub fn active_watch_count(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }
}

impl Default for WatchController {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<(usize, Vec<PathBuf>)>,
    mut trackers: Vec<ChangeTracker>,
    handler: Arc<dyn ChangeHandler>,
) {
    while let Some((index, paths)) = rx.recv().await {
        let Some(tracker) = trackers.get_mut(index) else {
            continue;
        };
        for path in paths {
            for change in tracker.classify(path) {
                debug!("{:?}", change);
                spawn_handler(&handler, &tracker.watch_root.root, change);
            }
        }
    }
}

fn spawn_handler(handler: &Arc<dyn ChangeHandler>, origin: &Path, change: FileChange) {
    let handler = Arc::clone(handler);
    let origin = origin.to_path_buf();
    tokio::spawn(async move {
        handler.on_change(&origin, change).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackify_core::GlobConfig;
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        changes: std::sync::Mutex<Vec<FileChange>>,
    }

    #[async_trait]
    impl ChangeHandler for Recorder {
        async fn on_change(&self, _origin: &Path, change: FileChange) {
            self.changes.lock().unwrap().push(change);
        }
    }

    fn watch_root(root: &Path, globs: &str) -> WatchRoot {
        let spec = GlobConfig::new(root, globs).resolve().unwrap();
        WatchRoot::new(root, spec)
    }

    #[tokio::test]
    async fn test_stop_without_start_is_fine() {
        let controller = WatchController::new();
        controller.stop().await;
        controller.stop().await;
        assert!(!controller.is_watching());
        assert_eq!(controller.active_watch_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_until_stopped_returns_when_idle() {
        let controller = WatchController::new();
        tokio::time::timeout(Duration::from_secs(1), controller.wait_until_stopped())
            .await
            .expect("idle controller should not block");
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_session() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let controller = WatchController::new();
        let handler: Arc<dyn ChangeHandler> = Arc::new(Recorder::default());

        let roots = vec![watch_root(dir.path(), "**/*"), watch_root(other.path(), "**/*")];
        controller
            .start(roots.clone(), WatchOptions::default(), Arc::clone(&handler))
            .await
            .unwrap();
        controller
            .start(roots, WatchOptions::default(), handler)
            .await
            .unwrap();

        assert!(controller.is_watching());
        assert_eq!(controller.active_watch_count(), 2);

        controller.stop().await;
        assert!(!controller.is_watching());
        assert_eq!(controller.active_watch_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_waiters() {
        let dir = tempdir().unwrap();
        let controller = Arc::new(WatchController::new());
        controller
            .start(
                vec![watch_root(dir.path(), "**/*")],
                WatchOptions::default(),
                Arc::new(Recorder::default()),
            )
            .await
            .unwrap();

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait_until_stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        controller.stop().await;
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should resolve after stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_initial_snapshot_when_not_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        fs::write(dir.path().join("b.md"), "B").unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = WatchController::new();

        let options = WatchOptions {
            ignore_initial: false,
            ..WatchOptions::default()
        };
        controller
            .start(vec![watch_root(dir.path(), "*.txt")], options, recorder.clone())
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while recorder.changes.lock().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        controller.stop().await;

        let changes = recorder.changes.lock().unwrap().clone();
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], FileChange::Created(p) if p.ends_with("a.txt")));
    }

    #[test]
    fn test_tracker_names_changes() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let existing = root.join("old.txt");
        fs::write(&existing, "x").unwrap();
        let mut tracker = ChangeTracker::new(watch_root(root, "**/*.txt"), vec![existing.clone()]);

        let fresh = root.join("new.txt");
        fs::write(&fresh, "y").unwrap();
        assert_eq!(tracker.classify(fresh.clone()), vec![FileChange::Created(fresh.clone())]);
        assert_eq!(tracker.classify(fresh.clone()), vec![FileChange::Modified(fresh)]);

        fs::remove_file(&existing).unwrap();
        assert_eq!(tracker.classify(existing.clone()), vec![FileChange::Deleted(existing)]);

        let unmatched = root.join("image.png");
        fs::write(&unmatched, "z").unwrap();
        assert!(tracker.classify(unmatched).is_empty());
    }

    #[test]
    fn test_tracker_expands_removed_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let a = root.join("docs/a.txt");
        let b = root.join("docs/b.txt");
        let mut tracker = ChangeTracker::new(watch_root(root, "**/*"), vec![a.clone(), b.clone()]);

        let mut changes = tracker.classify(root.join("docs"));
        changes.sort_by(|x, y| x.path().cmp(y.path()));

        assert_eq!(changes, vec![FileChange::Deleted(a), FileChange::Deleted(b)]);
    }

    #[test]
    fn test_tracker_discovers_files_of_moved_in_directory() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let root = dir.path();
        let known = root.join("a.txt");
        fs::write(&known, "A").unwrap();
        let mut tracker = ChangeTracker::new(watch_root(root, "**/*.txt"), vec![known]);

        fs::create_dir_all(outside.path().join("pkg/inner")).unwrap();
        fs::write(outside.path().join("pkg/b.txt"), "B").unwrap();
        fs::write(outside.path().join("pkg/inner/c.txt"), "C").unwrap();
        fs::write(outside.path().join("pkg/skip.bin"), "").unwrap();
        fs::rename(outside.path().join("pkg"), root.join("pkg")).unwrap();

        let changes = tracker.classify(root.join("pkg"));
        assert_eq!(
            changes,
            vec![
                FileChange::Created(root.join("pkg/b.txt")),
                FileChange::Created(root.join("pkg/inner/c.txt")),
            ]
        );

        // Already-known files are not reported twice.
        assert!(tracker.classify(root.join("pkg")).is_empty());
    }

    #[tokio::test]
    async fn test_session_reports_moved_in_directory() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = WatchController::new();
        controller
            .start(
                vec![watch_root(&root, "**/*.txt")],
                WatchOptions::default(),
                recorder.clone(),
            )
            .await
            .unwrap();

        fs::create_dir_all(outside.path().join("pkg")).unwrap();
        fs::write(outside.path().join("pkg/b.txt"), "B").unwrap();
        fs::rename(outside.path().join("pkg"), root.join("pkg")).unwrap();

        let expected = FileChange::Created(root.join("pkg/b.txt"));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !recorder.changes.lock().unwrap().contains(&expected) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        controller.stop().await;

        assert!(recorder.changes.lock().unwrap().contains(&expected));
    }
}
