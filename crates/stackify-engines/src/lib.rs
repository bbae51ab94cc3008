//! Stackify engines.
//!
//! Three file-pipeline engines share one lifecycle ([`Engine`]): do the
//! work once, then watch and redo it on every change.
//!
//! - [`CombineEngine`] concatenates matched files into text outputs.
//! - [`SyncEngine`] mirrors matched files between a root and its targets.
//! - [`ArchiveEngine`] packs matched files into zip archives.
//!
//! ```no_run
//! use stackify_engines::{CombineEngine, CombineOptions, Engine};
//!
//! # async fn demo() -> stackify_engines::Result<()> {
//! let engine = CombineEngine::new(CombineOptions {
//!     root_directory: "./my-project".into(),
//!     source_glob: "src/**/*.rs,!**/generated/**".into(),
//!     output_paths: vec!["project.txt".into()],
//!     ..CombineOptions::default()
//! })?;
//! engine.run_once().await?;
//! engine.start_watch().await?;
//! engine.wait_until_stopped().await;
//! # Ok(())
//! # }
//! ```

mod archive;
mod combine;
mod config;
mod echo;
mod engine;
mod error;
mod sync;

pub use archive::{ArchiveEngine, ArchiveOptions, ArchiveSummary};
pub use combine::{format_block, CombineEngine, CombineOptions, CombineSummary};
pub use config::{ProjectConfig, CONFIG_FILE, TEMPLATE};
pub use echo::{content_hash, EchoGuard, ECHO_WINDOW};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use sync::{SyncEngine, SyncOptions, SyncSummary};
