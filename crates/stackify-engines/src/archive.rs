//! Zip engine.
//!
//! Packs every matched file into one or more zip archives. Entry names are
//! relative to the root and always use forward slashes.

use crate::engine::{canonical_root, require, under_root, watch_options, Engine};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use stackify_core::{path_to_slash, GlobConfig, Logger};
use stackify_watcher::{ChangeHandler, FileChange, WatchController, WatchRoot};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const COMPRESSION_LEVEL: i64 = 9;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveOptions {
    pub root_directory: PathBuf,
    pub source_glob: String,
    /// Relative to `root_directory` unless absolute.
    pub output_paths: Vec<PathBuf>,
    pub ignore_file: Option<PathBuf>,
    pub debug: bool,
    pub debounce_ms: Option<u64>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("."),
            source_glob: String::new(),
            output_paths: Vec::new(),
            ignore_file: None,
            debug: false,
            debounce_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub outputs: Vec<PathBuf>,
}

struct Archiver {
    root: PathBuf,
    globs: GlobConfig,
    outputs: Vec<PathBuf>,
    logger: Logger,
}

impl Archiver {
    async fn zip_files(&self) -> Result<ArchiveSummary> {
        let files = self.globs.resolve()?.expand()?;
        let entries: Vec<(String, PathBuf)> = files
            .into_iter()
            .filter_map(|file| {
                let name = path_to_slash(file.strip_prefix(&self.root).ok()?);
                Some((name, file))
            })
            .collect();

        for output in &self.outputs {
            let output = output.clone();
            let batch = entries.clone();
            tokio::task::spawn_blocking(move || write_archive(&output, &batch)).await??;
        }

        for (name, _) in &entries {
            self.logger.log(format_args!("Zipped {}", name));
        }
        for output in &self.outputs {
            self.logger.log(format_args!("Wrote {}", output.display()));
        }

        Ok(ArchiveSummary {
            entries: entries.len(),
            outputs: self.outputs.clone(),
        })
    }
}

/// Writes `entries` (name, source file) into a fresh archive at `output`.
fn write_archive(output: &Path, entries: &[(String, PathBuf)]) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    let archive_err = |source| EngineError::Archive {
        path: output.to_path_buf(),
        source,
    };

    let file = File::create(output).map_err(|e| EngineError::io(output, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    for (name, source) in entries {
        let mut reader = match File::open(source) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} vanished before it could be zipped", source.display());
                continue;
            }
            Err(e) => return Err(EngineError::io(source, e)),
        };
        zip.start_file(name.as_str(), options).map_err(archive_err)?;
        std::io::copy(&mut reader, &mut zip).map_err(|e| EngineError::io(source, e))?;
    }

    zip.finish().map_err(archive_err)?;
    Ok(())
}

#[async_trait]
impl ChangeHandler for Archiver {
    async fn on_change(&self, _origin: &Path, change: FileChange) {
        self.logger.log(format_args!("File changed: {}", change.path().display()));
        if let Err(e) = self.zip_files().await {
            warn!("Zip in {} failed: {}", self.root.display(), e);
        }
    }
}

/// Watches globs and keeps zip archives of the matches up to date.
pub struct ArchiveEngine {
    archiver: Arc<Archiver>,
    options: ArchiveOptions,
    controller: WatchController,
}

impl ArchiveEngine {
    pub fn new(options: ArchiveOptions) -> Result<Self> {
        let logger = Logger::tracing(options.debug);
        Self::with_logger(options, logger)
    }

    pub fn with_logger(options: ArchiveOptions, logger: Logger) -> Result<Self> {
        require(!options.source_glob.trim().is_empty(), "zip needs a source glob")?;
        require(!options.output_paths.is_empty(), "zip needs at least one output path")?;

        let root = canonical_root(&options.root_directory)?;
        let outputs: Vec<PathBuf> = options
            .output_paths
            .iter()
            .map(|p| under_root(&root, p))
            .collect();
        let globs = GlobConfig::new(&root, options.source_glob.clone())
            .with_ignore_file(options.ignore_file.clone())
            .with_outputs(outputs.clone());

        Ok(Self {
            archiver: Arc::new(Archiver {
                root,
                globs,
                outputs,
                logger: logger.with_debug(options.debug || logger.is_debug()),
            }),
            options,
            controller: WatchController::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.archiver.root
    }

    /// Rewrites every archive from the files matched right now.
    pub async fn zip_files(&self) -> Result<ArchiveSummary> {
        self.archiver.zip_files().await
    }

    pub fn is_watching(&self) -> bool {
        self.controller.is_watching()
    }
}

#[async_trait]
impl Engine for ArchiveEngine {
    fn describe(&self) -> String {
        format!(
            "zip \"{}\" -> {}",
            self.options.source_glob,
            self.archiver
                .outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    async fn run_once(&self) -> Result<()> {
        self.zip_files().await.map(|_| ())
    }

    async fn start_watch(&self) -> Result<()> {
        let spec = self.archiver.globs.resolve()?;
        let roots = vec![WatchRoot::new(&self.archiver.root, spec)];
        let options = watch_options(self.options.debounce_ms, true);
        self.controller
            .start(roots, options, Arc::clone(&self.archiver) as Arc<dyn ChangeHandler>)
            .await?;
        self.archiver.logger.log(format_args!(
            "Watching \"{}\" in {}",
            self.options.source_glob,
            self.archiver.root.display()
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
