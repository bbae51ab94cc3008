//! Combine engine.
//!
//! Concatenates every matched file into one text artifact. Each file
//! becomes a block:
//!
//! ```text
//! File:/abs/path/to/file
//! ----------
//! <content>
//! ----------
//! ```
//!
//! The outputs are always excluded from the globs, so writing them never
//! feeds back into the next combine.

use crate::engine::{canonical_root, ensure_parent, require, under_root, watch_options, Engine};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use stackify_core::{path_to_slash, GlobConfig, Logger};
use stackify_watcher::{ChangeHandler, FileChange, WatchController, WatchRoot};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

const SEPARATOR: &str = "----------";

/// Renders one file's block of the combined artifact.
pub fn format_block(path: &str, content: &str) -> String {
    format!("File:{path}\n{SEPARATOR}\n{content}\n{SEPARATOR}\n")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombineOptions {
    pub root_directory: PathBuf,
    pub source_glob: String,
    /// Relative to `root_directory` unless absolute.
    pub output_paths: Vec<PathBuf>,
    pub ignore_file: Option<PathBuf>,
    pub debug: bool,
    pub debounce_ms: Option<u64>,
    /// Skip the synthetic Created events for files present at start.
    pub ignore_initial: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("."),
            source_glob: String::new(),
            output_paths: Vec::new(),
            ignore_file: None,
            debug: false,
            debounce_ms: None,
            ignore_initial: true,
        }
    }
}

/// What one combine run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineSummary {
    pub files: usize,
    pub bytes: usize,
    pub outputs: Vec<PathBuf>,
}

struct Combiner {
    root: PathBuf,
    globs: GlobConfig,
    outputs: Vec<PathBuf>,
    logger: Logger,
}

impl Combiner {
    async fn combine(&self) -> Result<CombineSummary> {
        let spec = self.globs.resolve()?;
        let files = spec.expand()?;

        let mut text = String::new();
        let mut included = 0;
        for file in &files {
            let bytes = match tokio::fs::read(file).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.logger.log(format_args!("Combine: {} vanished, skipping", file.display()));
                    continue;
                }
                Err(e) => return Err(EngineError::io(file, e)),
            };
            let path = path_to_slash(file);
            self.logger.log(format_args!("Combine: {}", path));
            text.push_str(&format_block(&path, &String::from_utf8_lossy(&bytes)));
            included += 1;
        }

        for output in &self.outputs {
            ensure_parent(output).await?;
            tokio::fs::write(output, &text)
                .await
                .map_err(|e| EngineError::io(output, e))?;
            self.logger.log(format_args!("Copied combined into {}", output.display()));
        }

        Ok(CombineSummary {
            files: included,
            bytes: text.len(),
            outputs: self.outputs.clone(),
        })
    }
}

#[async_trait]
impl ChangeHandler for Combiner {
    async fn on_change(&self, _origin: &Path, change: FileChange) {
        self.logger.log(format_args!("File changed: {}", change.path().display()));
        if let Err(e) = self.combine().await {
            warn!("Combine in {} failed: {}", self.root.display(), e);
        }
    }
}

/// Watches globs and keeps one or more combined text files up to date.
pub struct CombineEngine {
    combiner: Arc<Combiner>,
    options: CombineOptions,
    controller: WatchController,
}

impl CombineEngine {
    pub fn new(options: CombineOptions) -> Result<Self> {
        let logger = Logger::tracing(options.debug);
        Self::with_logger(options, logger)
    }

    /// Like [`CombineEngine::new`] with a custom log sink.
    pub fn with_logger(options: CombineOptions, logger: Logger) -> Result<Self> {
        require(!options.source_glob.trim().is_empty(), "combine needs a source glob")?;
        require(!options.output_paths.is_empty(), "combine needs at least one output path")?;

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
            combiner: Arc::new(Combiner {
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
        &self.combiner.root
    }

    /// Rebuilds every output from the files matched right now.
    pub async fn combine(&self) -> Result<CombineSummary> {
        self.combiner.combine().await
    }

    pub fn is_watching(&self) -> bool {
        self.controller.is_watching()
    }
}

#[async_trait]
impl Engine for CombineEngine {
    fn describe(&self) -> String {
        format!(
            "combine \"{}\" -> {}",
            self.options.source_glob,
            self.combiner
                .outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    async fn run_once(&self) -> Result<()> {
        self.combine().await.map(|_| ())
    }

    async fn start_watch(&self) -> Result<()> {
        let spec = self.combiner.globs.resolve()?;
        let roots = vec![WatchRoot::new(&self.combiner.root, spec)];
        let options = watch_options(self.options.debounce_ms, self.options.ignore_initial);
        self.controller
            .start(roots, options, Arc::clone(&self.combiner) as Arc<dyn ChangeHandler>)
            .await?;
        self.combiner.logger.log(format_args!(
            "Watching \"{}\" in {}",
            self.options.source_glob,
            self.combiner.root.display()
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn options(root: &Path, glob: &str, output: &str) -> CombineOptions {
        CombineOptions {
            root_directory: root.to_path_buf(),
            source_glob: glob.to_string(),
            output_paths: vec![PathBuf::from(output)],
            ..CombineOptions::default()
        }
    }

    fn blocks(text: &str) -> HashSet<String> {
        text.split_inclusive(&format!("{SEPARATOR}\n"))
            .collect::<Vec<_>>()
            .chunks(2)
            .map(|pair| pair.concat())
            .collect()
    }

    #[tokio::test]
    async fn test_combine_two_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        fs::write(dir.path().join("b.txt"), "B").unwrap();

        let engine = CombineEngine::new(options(dir.path(), "*.txt", "out/project.txt")).unwrap();
        let summary = engine.combine().await.unwrap();

        let root = engine.root().to_path_buf();
        let text = fs::read_to_string(root.join("out/project.txt")).unwrap();
        let expected: HashSet<String> = ["a.txt", "b.txt"]
            .iter()
            .map(|name| {
                let content = if *name == "a.txt" { "A" } else { "B" };
                format_block(&path_to_slash(&root.join(name)), content)
            })
            .collect();

        assert_eq!(blocks(&text), expected);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, text.len());
    }

    #[tokio::test]
    async fn test_combine_is_idempotent_with_output_in_glob() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();

        let engine = CombineEngine::new(options(dir.path(), "**/*", "combined.txt")).unwrap();
        engine.combine().await.unwrap();
        let first = fs::read(dir.path().join("combined.txt")).unwrap();
        engine.combine().await.unwrap();
        let second = fs::read(dir.path().join("combined.txt")).unwrap();

        assert_eq!(first, second);
        assert!(!String::from_utf8(second).unwrap().contains("combined.txt"));
    }

    #[tokio::test]
    async fn test_combine_writes_every_output() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "# A").unwrap();
        let mut opts = options(dir.path(), "*.md", "one.txt");
        opts.output_paths.push(PathBuf::from("two/two.txt"));

        let engine = CombineEngine::new(opts).unwrap();
        engine.combine().await.unwrap();

        let one = fs::read_to_string(dir.path().join("one.txt")).unwrap();
        let two = fs::read_to_string(dir.path().join("two/two.txt")).unwrap();
        assert_eq!(one, two);
        assert!(one.ends_with("# A\n----------\n"));
    }

    #[tokio::test]
    async fn test_combine_decodes_invalid_utf8_lossily() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bin.dat"), [0x66, 0x6f, 0xff, 0x6f]).unwrap();

        let engine = CombineEngine::new(options(dir.path(), "*.dat", "out.txt")).unwrap();
        engine.combine().await.unwrap();

        let text = fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert!(text.contains("fo\u{FFFD}o"));
    }

    #[tokio::test]
    async fn test_change_handler_recombines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        let engine = CombineEngine::new(options(dir.path(), "*.txt", "out.log")).unwrap();
        engine.combine().await.unwrap();

        let b = engine.root().join("b.txt");
        fs::write(&b, "B").unwrap();
        engine
            .combiner
            .on_change(engine.root(), FileChange::Created(b))
            .await;

        let text = fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(blocks(&text).len(), 2);
    }

    #[test]
    fn test_new_rejects_missing_outputs() {
        let dir = tempdir().unwrap();
        let opts = CombineOptions {
            root_directory: dir.path().to_path_buf(),
            source_glob: "**/*".into(),
            ..CombineOptions::default()
        };
        assert!(matches!(
            CombineEngine::new(opts),
            Err(EngineError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_format_block() {
        assert_eq!(
            format_block("/p/a.txt", "A"),
            "File:/p/a.txt\n----------\nA\n----------\n"
        );
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_watch_recombines_on_new_file_and_moved_in_directory() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        let engine = CombineEngine::new(options(dir.path(), "**/*.txt", "out.log")).unwrap();
        let root = engine.root().to_path_buf();
        let output = root.join("out.log");
        engine.run_once().await.unwrap();
        engine.start_watch().await.unwrap();

        let lists = |file: PathBuf| {
            let header = format!("File:{}\n", path_to_slash(&file));
            let output = output.clone();
            move || {
                fs::read_to_string(&output)
                    .map(|text| text.contains(&header))
                    .unwrap_or(false)
            }
        };

        fs::write(root.join("b.txt"), "B").unwrap();
        assert!(eventually(lists(root.join("b.txt"))).await);

        fs::create_dir_all(outside.path().join("pkg")).unwrap();
        fs::write(outside.path().join("pkg/c.txt"), "C").unwrap();
        fs::rename(outside.path().join("pkg"), root.join("pkg")).unwrap();
        assert!(eventually(lists(root.join("pkg/c.txt"))).await);

        engine.stop_watch().await;
        engine.wait_until_stopped().await;
        assert!(!engine.is_watching());
    }
}
