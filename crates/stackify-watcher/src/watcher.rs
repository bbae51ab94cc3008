//! File watcher for real-time updates.
//!
//! Uses the notify crate (through its mini debouncer) to watch a
//! directory tree. Bursts of writes to the same path collapse into one
//! report per debounce window.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Debounce window used when nothing else is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Type of file change detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Created(path) | FileChange::Modified(path) | FileChange::Deleted(path) => {
                path
            }
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, FileChange::Deleted(_))
    }
}

/// Watches one directory tree and reports debounced batches of paths.
///
/// Dropping the watcher releases the OS watch.
pub struct FileWatcher {
    root: PathBuf,
    #[allow(dead_code)]
    debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl FileWatcher {
    /// Starts watching `root` recursively.
    ///
    /// `on_paths` runs on the debouncer's thread with every path touched
    /// during one window. It must not block for long.
    pub fn new<F>(root: &Path, debounce: Duration, mut on_paths: F) -> Result<Self, notify::Error>
    where
        F: FnMut(Vec<PathBuf>) + Send + 'static,
    {
        let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|event| event.path).collect();
                if !paths.is_empty() {
                    debug!("{} paths changed", paths.len());
                    on_paths(paths);
                }
            }
            Err(e) => warn!("Watch error: {:?}", e),
        })?;

        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        info!("Watching {} for changes", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            debouncer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        debug!("Stopped watching {}", self.root.display());
    }
}
