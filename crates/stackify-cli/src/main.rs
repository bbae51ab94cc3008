//! Stackify CLI
//!
//! Runs the combine, sync and zip engines from the command line, either
//! one job at a time or every job listed in a `stackify.toml`.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "stackify")]
#[command(author = "Stackify Contributors")]
#[command(version)]
#[command(about = "Combine, mirror and zip files as they change", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every single-job command.
#[derive(Args, Debug)]
struct JobArgs {
    /// Root directory the globs are resolved against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Comma-separated globs; prefix with ! to exclude
    #[arg(short, long)]
    glob: String,

    /// Gitignore-style file of extra exclusions, relative to the root
    #[arg(short, long)]
    ignore_file: Option<PathBuf>,

    /// Keep running and redo the job on every change
    #[arg(short, long)]
    watch: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter stackify.toml
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Concatenate matched files into text outputs
    Combine {
        #[command(flatten)]
        job: JobArgs,

        /// Output file, relative to the root (repeatable)
        #[arg(short, long = "output", required = true)]
        outputs: Vec<PathBuf>,
    },

    /// Mirror matched files into target directories, both ways
    Sync {
        #[command(flatten)]
        job: JobArgs,

        /// Target directory, relative to the root (repeatable)
        #[arg(short, long = "target", required = true)]
        targets: Vec<PathBuf>,

        /// Empty the targets before the initial copy
        #[arg(long)]
        clean: bool,
    },

    /// Pack matched files into zip archives
    Zip {
        #[command(flatten)]
        job: JobArgs,

        /// Archive path, relative to the root (repeatable)
        #[arg(short, long = "output", required = true)]
        outputs: Vec<PathBuf>,
    },

    /// Run every job in a config file and watch until Ctrl+C
    Run {
        /// Config file
        #[arg(short, long, default_value = "stackify.toml")]
        config: PathBuf,

        /// Run each job once and exit instead of watching
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let verbose = cli.verbose;
    let result = match cli.command {
        Commands::Init { path } => commands::init(&path),
        Commands::Combine { job, outputs } => commands::combine(job, outputs, verbose).await,
        Commands::Sync {
            job,
            targets,
            clean,
        } => commands::sync(job, targets, clean, verbose).await,
        Commands::Zip { job, outputs } => commands::zip(job, outputs, verbose).await,
        Commands::Run { config, once } => commands::run(&config, once, verbose).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_accepts_repeated_targets() {
        let cli = Cli::try_parse_from([
            "stackify", "sync", "--glob", "**/*", "--target", "../a", "--target", "../b", "--clean",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync {
                job,
                targets,
                clean,
            } => {
                assert_eq!(job.root, PathBuf::from("."));
                assert_eq!(targets, vec![PathBuf::from("../a"), PathBuf::from("../b")]);
                assert!(clean);
                assert!(!job.watch);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_combine_requires_an_output() {
        assert!(Cli::try_parse_from(["stackify", "combine", "--glob", "*.rs"]).is_err());
    }
}
