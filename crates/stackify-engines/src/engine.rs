//! The shape every engine shares, plus the small path helpers they use.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use stackify_core::StackifyError;
use stackify_watcher::{WatchOptions, DEFAULT_DEBOUNCE};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A configured job that can run once and then keep reacting to changes.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short human-readable description, used in CLI output.
    fn describe(&self) -> String;

    /// The one-shot pass run before watching: combine, copy or zip.
    async fn run_once(&self) -> Result<()>;

    async fn start_watch(&self) -> Result<()>;

    async fn stop_watch(&self);

    async fn wait_until_stopped(&self);
}

/// Canonical form of an existing root directory.
pub(crate) fn canonical_root(root: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(root)
        .map_err(|_| StackifyError::RootNotFound(root.to_path_buf()))?;
    if !canonical.is_dir() {
        return Err(StackifyError::RootNotFound(root.to_path_buf()).into());
    }
    Ok(canonical)
}

/// `path` joined onto `root` unless it is already absolute.
pub(crate) fn under_root(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

pub(crate) fn watch_options(debounce_ms: Option<u64>, ignore_initial: bool) -> WatchOptions {
    WatchOptions {
        debounce: debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE),
        ignore_initial,
    }
}

pub(crate) fn require(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(EngineError::InvalidOptions(message.to_string()))
    }
}

/// Creates the parent directory of `path` if it is missing.
pub(crate) async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io(parent, e))?;
    }
    Ok(())
}
