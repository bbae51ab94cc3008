//! `stackify.toml` project configuration.

use crate::archive::{ArchiveEngine, ArchiveOptions};
use crate::combine::{CombineEngine, CombineOptions};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::sync::{SyncEngine, SyncOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config file name looked up by `stackify run`.
pub const CONFIG_FILE: &str = "stackify.toml";

/// Starter config written by `stackify init`.
pub const TEMPLATE: &str = r#"# Stackify project configuration.
# Paths are relative to `root`, which is relative to this file.

root = "."
debounce_ms = 100
debug = false

# Concatenate matched files into one text file.
[[combine]]
source_glob = "**/*,!**/node_modules/**,!**/target/**"
output_paths = ["stackify-project.txt"]
ignore_file = ".gitignore"

# Mirror matched files into other directories, both ways.
# [[sync]]
# source_glob = "src/**/*"
# target_dirs = ["../mirror"]
# ignore_file = ".gitignore"
# clean_targets = false

# Pack matched files into a zip archive.
# [[zip]]
# source_glob = "src/**/*"
# output_paths = ["dist/src.zip"]
"#;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project root. Relative to the config file's directory.
    pub root: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub debug: bool,
    pub combine: Vec<CombineOptions>,
    pub sync: Vec<SyncOptions>,
    pub zip: Vec<ArchiveOptions>,
}

impl ProjectConfig {
    /// Reads and parses a config file, anchoring every job at the project root.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let config = Self::parse(&text, base).map_err(|source| EngineError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "Loaded {}: {} combine, {} sync, {} zip",
            path.display(),
            config.combine.len(),
            config.sync.len(),
            config.zip.len()
        );
        Ok(config)
    }

    /// Parses config text. Relative paths are resolved against `base`.
    pub fn parse(text: &str, base: &Path) -> std::result::Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(text)?;
        config.anchor(base);
        Ok(config)
    }

    fn anchor(&mut self, base: &Path) {
        let root = match &self.root {
            Some(root) => base.join(root),
            None => base.to_path_buf(),
        };

        for job in &mut self.combine {
            job.root_directory = root.join(&job.root_directory);
            job.debug |= self.debug;
            job.debounce_ms = job.debounce_ms.or(self.debounce_ms);
        }
        for job in &mut self.sync {
            job.root_directory = root.join(&job.root_directory);
            job.debug |= self.debug;
            job.debounce_ms = job.debounce_ms.or(self.debounce_ms);
        }
        for job in &mut self.zip {
            job.root_directory = root.join(&job.root_directory);
            job.debug |= self.debug;
            job.debounce_ms = job.debounce_ms.or(self.debounce_ms);
        }
        self.root = Some(root);
    }

    /// Turns on debug logging for every job.
    pub fn enable_debug(&mut self) {
        self.debug = true;
        self.combine.iter_mut().for_each(|job| job.debug = true);
        self.sync.iter_mut().for_each(|job| job.debug = true);
        self.zip.iter_mut().for_each(|job| job.debug = true);
    }

    pub fn is_empty(&self) -> bool {
        self.combine.is_empty() && self.sync.is_empty() && self.zip.is_empty()
    }

    /// Builds one engine per job, combine first, then sync, then zip.
    pub fn into_engines(self) -> Result<Vec<Box<dyn Engine>>> {
        let mut engines: Vec<Box<dyn Engine>> = Vec::new();
        for job in self.combine {
            engines.push(Box::new(CombineEngine::new(job)?));
        }
        for job in self.sync {
            engines.push(Box::new(SyncEngine::new(job)?));
        }
        for job in self.zip {
            engines.push(Box::new(ArchiveEngine::new(job)?));
        }
        Ok(engines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_anchors_jobs_at_root() {
        let config = ProjectConfig::parse(
            r#"
            root = "project"
            debounce_ms = 250

            [[combine]]
            source_glob = "**/*"
            output_paths = ["all.txt"]

            [[sync]]
            root_directory = "src"
            source_glob = "**/*.rs"
            target_dirs = ["../mirror"]
            debounce_ms = 50
            "#,
            Path::new("/home/me"),
        )
        .unwrap();

        assert_eq!(config.root, Some(PathBuf::from("/home/me/project")));
        assert_eq!(config.combine[0].root_directory, PathBuf::from("/home/me/project/."));
        assert_eq!(config.combine[0].debounce_ms, Some(250));
        assert!(config.combine[0].ignore_initial);
        assert_eq!(config.sync[0].root_directory, PathBuf::from("/home/me/project/src"));
        assert_eq!(config.sync[0].debounce_ms, Some(50));
        assert!(!config.sync[0].clean_targets);
        assert!(config.zip.is_empty());
    }

    #[test]
    fn test_project_debug_reaches_every_job() {
        let config = ProjectConfig::parse(
            "debug = true\n[[zip]]\nsource_glob = \"*\"\noutput_paths = [\"a.zip\"]\n",
            Path::new("."),
        )
        .unwrap();
        assert!(config.zip[0].debug);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(ProjectConfig::parse("colour = \"blue\"\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_misspelled_job_keys_are_rejected() {
        for job in [
            "[[combine]]\nsource_glob = \"*\"\nignore_fle = \".gitignore\"\n",
            "[[sync]]\nsource_glob = \"*\"\ntarget_dir = [\"../m\"]\n",
            "[[zip]]\nsource_glob = \"*\"\noutput_path = [\"a.zip\"]\n",
        ] {
            assert!(ProjectConfig::parse(job, Path::new(".")).is_err(), "{}", job);
        }
    }

    #[test]
    fn test_template_parses() {
        let config = ProjectConfig::parse(TEMPLATE, Path::new(".")).unwrap();
        assert_eq!(config.combine.len(), 1);
        assert!(config.sync.is_empty());
        assert!(!config.is_empty());
    }

    #[test]
    fn test_load_reports_invalid_toml_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[[combine]\n").unwrap();

        match ProjectConfig::load(&path) {
            Err(EngineError::ConfigFile { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = ProjectConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }

    #[test]
    fn test_into_engines_builds_every_job() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
            [[combine]]
            source_glob = "src/**/*"
            output_paths = ["all.txt"]

            [[zip]]
            source_glob = "src/**/*"
            output_paths = ["src.zip"]
            "#,
        )
        .unwrap();

        let engines = ProjectConfig::load(&path).unwrap().into_engines().unwrap();
        assert_eq!(engines.len(), 2);
        assert!(engines[0].describe().starts_with("combine"));
        assert!(engines[1].describe().starts_with("zip"));
    }
}
