//! Echo suppression for mirrored writes.
//!
//! When the sync engine writes `b/x` because `a/x` changed, the watcher
//! on `b` reports that write right back. The guard remembers what each
//! write left on disk (a content hash, or "absent" for removals) for a
//! short window; an event whose path still looks exactly like that is
//! the engine's own echo and gets dropped.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a recorded write is remembered.
pub const ECHO_WINDOW: Duration = Duration::from_secs(2);

/// SHA-256 of some bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
struct Echo {
    hash: Option<String>,
    at: Instant,
}

#[derive(Debug)]
pub struct EchoGuard {
    window: Duration,
    entries: Mutex<HashMap<PathBuf, Echo>>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Remembers that `path` was just written with content hashing to `hash`.
    pub fn record_write(&self, path: &Path, hash: String) {
        self.record(path, Some(hash));
    }

    /// Remembers that `path` was just removed.
    pub fn record_removal(&self, path: &Path) {
        self.record(path, None);
    }

    fn record(&self, path: &Path, hash: Option<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, echo| now.duration_since(echo.at) < self.window);
        entries.insert(path.to_path_buf(), Echo { hash, at: now });
    }

    /// Whether the current state of `path` is one this guard recorded
    /// inside the window.
    pub async fn is_echo(&self, path: &Path) -> bool {
        let expected = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get(path) {
                Some(echo) if echo.at.elapsed() < self.window => echo.hash.clone(),
                _ => return false,
            }
        };

        let current = match tokio::fs::read(path).await {
            Ok(bytes) => Some(content_hash(&bytes)),
            Err(_) => None,
        };
        current == expected
    }
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new(ECHO_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_recorded_write_is_echo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let guard = EchoGuard::default();
        guard.record_write(&path, content_hash(b"hello"));

        assert!(guard.is_echo(&path).await);
    }

    #[tokio::test]
    async fn test_different_content_is_not_echo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "edited by hand").unwrap();

        let guard = EchoGuard::default();
        guard.record_write(&path, content_hash(b"hello"));

        assert!(!guard.is_echo(&path).await);
    }

    #[tokio::test]
    async fn test_recorded_removal_is_echo_while_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.txt");

        let guard = EchoGuard::default();
        guard.record_removal(&path);
        assert!(guard.is_echo(&path).await);

        fs::write(&path, "back again").unwrap();
        assert!(!guard.is_echo(&path).await);
    }

    #[tokio::test]
    async fn test_expired_entries_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let guard = EchoGuard::new(Duration::from_millis(10));
        guard.record_write(&path, content_hash(b"hello"));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!guard.is_echo(&path).await);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_echo() {
        let guard = EchoGuard::default();
        assert!(!guard.is_echo(Path::new("/nowhere/at/all")).await);
    }
}
