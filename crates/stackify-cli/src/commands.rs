//! CLI command implementations.

use crate::JobArgs;
use colored::Colorize;
use stackify_engines::{
    ArchiveEngine, ArchiveOptions, CombineEngine, CombineOptions, Engine, ProjectConfig,
    SyncEngine, SyncOptions, CONFIG_FILE, TEMPLATE,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Write a starter config into a directory.
pub fn init(path: &Path) -> Result<()> {
    let config_path = path.join(CONFIG_FILE);

    if config_path.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    fs::create_dir_all(path)?;
    fs::write(&config_path, TEMPLATE)?;

    println!("{} Wrote {}", "✓".green(), config_path.display());
    println!("  Run {} to start watching", "stackify run".cyan());

    Ok(())
}

pub async fn combine(job: JobArgs, outputs: Vec<PathBuf>, verbose: bool) -> Result<()> {
    let engine = CombineEngine::new(CombineOptions {
        root_directory: job.root,
        source_glob: job.glob,
        output_paths: outputs,
        ignore_file: job.ignore_file,
        debug: verbose,
        ..CombineOptions::default()
    })?;

    let summary = engine.combine().await?;
    println!(
        "{} Combined {} files ({} bytes)",
        "✓".green(),
        summary.files.to_string().cyan(),
        summary.bytes
    );
    for output in &summary.outputs {
        println!("  {}", output.display());
    }

    if job.watch {
        watch_until_interrupted(&[&engine]).await?;
    }
    Ok(())
}

pub async fn sync(job: JobArgs, targets: Vec<PathBuf>, clean: bool, verbose: bool) -> Result<()> {
    let engine = SyncEngine::new(SyncOptions {
        root_directory: job.root,
        source_glob: job.glob,
        target_dirs: targets,
        ignore_file: job.ignore_file,
        clean_targets: clean,
        debug: verbose,
        ..SyncOptions::default()
    })?;

    let summary = engine.copy_to_targets().await?;
    println!(
        "{} Copied {} files into {} targets",
        "✓".green(),
        summary.copied.to_string().cyan(),
        engine.targets().len()
    );
    if summary.failed > 0 {
        println!(
            "  {} {} copies failed, run with --verbose for details",
            "!".yellow(),
            summary.failed
        );
    }

    if job.watch {
        watch_until_interrupted(&[&engine]).await?;
    }
    Ok(())
}

pub async fn zip(job: JobArgs, outputs: Vec<PathBuf>, verbose: bool) -> Result<()> {
    let engine = ArchiveEngine::new(ArchiveOptions {
        root_directory: job.root,
        source_glob: job.glob,
        output_paths: outputs,
        ignore_file: job.ignore_file,
        debug: verbose,
        ..ArchiveOptions::default()
    })?;

    let summary = engine.zip_files().await?;
    println!(
        "{} Zipped {} files",
        "✓".green(),
        summary.entries.to_string().cyan()
    );
    for output in &summary.outputs {
        println!("  {}", output.display());
    }

    if job.watch {
        watch_until_interrupted(&[&engine]).await?;
    }
    Ok(())
}

/// Run every job of a config file.
pub async fn run(config_path: &Path, once: bool, verbose: bool) -> Result<()> {
    let mut config = ProjectConfig::load(config_path)?;
    if config.is_empty() {
        return Err(format!("{} declares no jobs", config_path.display()).into());
    }
    if verbose {
        config.enable_debug();
    }

    let engines = config.into_engines()?;
    for engine in &engines {
        engine.run_once().await?;
        println!("{} {}", "✓".green(), engine.describe());
    }

    if !once {
        let refs: Vec<&dyn Engine> = engines.iter().map(|e| e.as_ref()).collect();
        watch_until_interrupted(&refs).await?;
    }
    Ok(())
}

/// Starts every engine's watch and blocks until Ctrl+C, then stops them all.
async fn watch_until_interrupted(engines: &[&dyn Engine]) -> Result<()> {
    for engine in engines {
        engine.start_watch().await?;
        info!("Watching: {}", engine.describe());
    }
    println!("{}", "Watching for changes, press Ctrl+C to stop".dimmed());

    tokio::signal::ctrl_c().await?;

    for engine in engines {
        engine.stop_watch().await;
    }
    for engine in engines {
        engine.wait_until_stopped().await;
    }
    println!("{} Stopped", "✓".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_template_once() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("project");
        init(&dir).unwrap();
        let written = fs::read_to_string(dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(written, TEMPLATE);

        fs::write(dir.join(CONFIG_FILE), "# edited").unwrap();
        init(&dir).unwrap();
        assert_eq!(fs::read_to_string(dir.join(CONFIG_FILE)).unwrap(), "# edited");
    }

    #[tokio::test]
    async fn test_run_once_executes_every_job() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("a.txt"), "A").unwrap();
        fs::write(
            dir.join(CONFIG_FILE),
            "[[combine]]\nsource_glob = \"*.txt\"\noutput_paths = [\"out/all.md\"]\n\n\
             [[zip]]\nsource_glob = \"*.txt\"\noutput_paths = [\"out/all.zip\"]\n",
        )
        .unwrap();

        run(&dir.join(CONFIG_FILE), true, false).await.unwrap();

        assert!(fs::read_to_string(dir.join("out/all.md")).unwrap().contains("\nA\n"));
        assert!(dir.join("out/all.zip").exists());
    }

    #[tokio::test]
    async fn test_run_rejects_empty_config() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join(CONFIG_FILE), "debug = true\n").unwrap();
        assert!(run(&dir.join(CONFIG_FILE), true, false).await.is_err());
    }
}
