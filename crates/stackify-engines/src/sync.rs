//! Bidirectional sync engine.
//!
//! Mirrors matched files between a source root and any number of target
//! directories. A change is always replayed relative to the root that
//! observed it, onto every other root, so edits made in a target reach
//! the source and the sibling targets alike.
//!
//! Our own writes come back as watch events. The [`EchoGuard`] drops
//! those so a single edit is propagated once.

use crate::echo::{content_hash, EchoGuard};
use crate::engine::{canonical_root, ensure_parent, require, under_root, watch_options, Engine};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use stackify_core::{GlobConfig, Logger};
use stackify_watcher::{ChangeHandler, FileChange, WatchController, WatchRoot};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncOptions {
    pub root_directory: PathBuf,
    pub source_glob: String,
    /// Relative to `root_directory` unless absolute. Created if missing.
    pub target_dirs: Vec<PathBuf>,
    pub ignore_file: Option<PathBuf>,
    /// Empty every target before the initial copy.
    pub clean_targets: bool,
    pub debug: bool,
    pub debounce_ms: Option<u64>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("."),
            source_glob: String::new(),
            target_dirs: Vec::new(),
            ignore_file: None,
            clean_targets: false,
            debug: false,
            debounce_ms: None,
        }
    }
}

/// Outcome of an initial copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub copied: usize,
    pub failed: usize,
}

struct Mirror {
    root: PathBuf,
    targets: Vec<PathBuf>,
    globs: GlobConfig,
    echo: EchoGuard,
    logger: Logger,
}

impl Mirror {
    /// Every root except `origin`.
    fn mirrors_of<'a>(&'a self, origin: &'a Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        std::iter::once(&self.root)
            .chain(self.targets.iter())
            .filter(move |root| root.as_path() != origin)
    }

    /// Glob config for watching `root`. Roots nested inside it are left out
    /// so the engine never mirrors a mirror into itself.
    fn globs_for(&self, root: &Path) -> GlobConfig {
        let base = if root == self.root {
            self.globs.clone()
        } else {
            self.globs.rooted_at(root)
        };
        let nested: Vec<PathBuf> = std::iter::once(&self.root)
            .chain(self.targets.iter())
            .filter(|other| other.as_path() != root)
            .filter_map(|other| other.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .collect();
        base.with_outputs(nested)
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> bool {
        let result = async {
            let bytes = tokio::fs::read(from)
                .await
                .map_err(|e| EngineError::io(from, e))?;
            ensure_parent(to).await?;
            self.echo.record_write(to, content_hash(&bytes));
            tokio::fs::write(to, &bytes)
                .await
                .map_err(|e| EngineError::io(to, e))?;
            Ok::<_, EngineError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.logger.log(format_args!("Copied {} to {}", from.display(), to.display()));
                true
            }
            Err(e) => {
                self.logger.log(format_args!(
                    "Error copying {} to {}: {}",
                    from.display(),
                    to.display(),
                    e
                ));
                false
            }
        }
    }

    async fn remove_file(&self, path: &Path) -> bool {
        self.echo.record_removal(path);
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                self.logger.log(format_args!("Removed {}", path.display()));
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                self.logger.log(format_args!("Error removing {}: {}", path.display(), e));
                false
            }
        }
    }

    async fn reconcile(&self, origin: &Path, change: FileChange) {
        let path = change.path();
        let Ok(relative) = path.strip_prefix(origin) else {
            warn!("{} is not under {}", path.display(), origin.display());
            return;
        };

        if self.echo.is_echo(path).await {
            self.logger.log(format_args!("Skipping own write {}", path.display()));
            return;
        }

        for mirror in self.mirrors_of(origin) {
            let destination = mirror.join(relative);
            if change.is_deletion() {
                self.remove_file(&destination).await;
            } else {
                self.copy_file(path, &destination).await;
            }
        }
    }

    async fn copy_to_targets(&self, clean: bool) -> Result<SyncSummary> {
        if clean {
            for target in &self.targets {
                self.clean_target(target).await?;
            }
        }

        let files = self.globs_for(&self.root).resolve()?.expand()?;
        let mut summary = SyncSummary::default();
        for file in &files {
            let Ok(relative) = file.strip_prefix(&self.root) else {
                continue;
            };
            for target in &self.targets {
                if self.copy_file(file, &target.join(relative)).await {
                    summary.copied += 1;
                } else {
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Removes everything inside `target`, keeping the directory itself.
    async fn clean_target(&self, target: &Path) -> Result<()> {
        if self.root.starts_with(target) {
            return Err(EngineError::InvalidOptions(format!(
                "refusing to clean {}: it contains the source root",
                target.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(target)
            .await
            .map_err(|e| EngineError::io(target, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(target, e))?
        {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let removed = if is_dir {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = removed {
                self.logger.log(format_args!("Error deleting {}: {}", path.display(), e));
            }
        }
        self.logger.log(format_args!("Cleaned {}", target.display()));
        Ok(())
    }
}

#[async_trait]
impl ChangeHandler for Mirror {
    async fn on_change(&self, origin: &Path, change: FileChange) {
        self.reconcile(origin, change).await;
    }
}

/// Keeps a source directory and its target directories mirrored.
pub struct SyncEngine {
    mirror: Arc<Mirror>,
    options: SyncOptions,
    controller: WatchController,
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Result<Self> {
        let logger = Logger::tracing(options.debug);
        Self::with_logger(options, logger)
    }

    /// Like [`SyncEngine::new`] with a custom log sink.
    ///
    /// Target directories are created here so they can be canonicalized.
    pub fn with_logger(options: SyncOptions, logger: Logger) -> Result<Self> {
        require(!options.source_glob.trim().is_empty(), "sync needs a source glob")?;
        require(!options.target_dirs.is_empty(), "sync needs at least one target directory")?;

        let root = canonical_root(&options.root_directory)?;
        let mut targets = Vec::with_capacity(options.target_dirs.len());
        for dir in &options.target_dirs {
            let dir = under_root(&root, dir);
            std::fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
            let target = canonical_root(&dir)?;
            require(target != root, "a sync target cannot be the source root")?;
            targets.push(target);
        }

        let globs = GlobConfig::new(&root, options.source_glob.clone())
            .with_ignore_file(options.ignore_file.clone());

        Ok(Self {
            mirror: Arc::new(Mirror {
                root,
                targets,
                globs,
                echo: EchoGuard::default(),
                logger: logger.with_debug(options.debug || logger.is_debug()),
            }),
            options,
            controller: WatchController::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.mirror.root
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.mirror.targets
    }

    /// Copies every matched source file into every target.
    ///
    /// Per-file failures are logged and counted, never returned.
    pub async fn copy_to_targets(&self) -> Result<SyncSummary> {
        self.mirror.copy_to_targets(self.options.clean_targets).await
    }

    /// Applies one change as if a watcher under `origin` had reported it.
    pub async fn apply(&self, origin: &Path, change: FileChange) {
        self.mirror.reconcile(origin, change).await;
    }

    pub fn is_watching(&self) -> bool {
        self.controller.is_watching()
    }

    pub fn active_watch_count(&self) -> usize {
        self.controller.active_watch_count()
    }
}

#[async_trait]
impl Engine for SyncEngine {
    fn describe(&self) -> String {
        format!(
            "sync \"{}\" {} <-> {}",
            self.options.source_glob,
            self.mirror.root.display(),
            self.mirror
                .targets
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    async fn run_once(&self) -> Result<()> {
        let summary = self.copy_to_targets().await?;
        if summary.failed > 0 {
            warn!("{} copies failed during initial sync", summary.failed);
        }
        Ok(())
    }

    async fn start_watch(&self) -> Result<()> {
        let mut roots = Vec::with_capacity(self.mirror.targets.len() + 1);
        roots.push(WatchRoot::new(
            &self.mirror.root,
            self.mirror.globs_for(&self.mirror.root).resolve()?,
        ));
        for target in &self.mirror.targets {
            roots.push(WatchRoot::new(target, self.mirror.globs_for(target).resolve()?));
            self.mirror.logger.log(format_args!("Watching {}", target.display()));
        }

        let options = watch_options(self.options.debounce_ms, true);
        self.controller
            .start(roots, options, Arc::clone(&self.mirror) as Arc<dyn ChangeHandler>)
            .await?;
        self.mirror.logger.log(format_args!(
            "Watching {} in {}",
            self.options.source_glob,
            self.mirror.root.display()
        ));
        Ok(())
    }

    async fn stop_watch(&self) {
        self.controller.stop().await;
    }

    async fn wait_until_stopped(&self) {
        self.controller.wait_until_stopped().await;
    }
}
