//! Stackify Core - glob resolution and shared plumbing
//!
//! This crate decides *which* files an engine cares about. It resolves a
//! comma-joined glob string plus an optional gitignore-style file into absolute
//! patterns, expands them against the filesystem, and answers whether a
//! single path (say, one a watcher just reported) is in the set.
//!
//! # Example
//!
//! ```no_run
//! use stackify_core::GlobConfig;
//!
//! let spec = GlobConfig::new(".", "src/**/*,!src/generated/**")
//!     .with_ignore_file(Some(".gitignore".into()))
//!     .resolve()
//!     .unwrap();
//! for file in spec.expand().unwrap() {
//!     println!("{}", file.display());
//! }
//! ```

pub mod error;
pub mod log;
pub mod resolver;

pub use error::{Result, StackifyError};
pub use log::{LogSink, Logger, NullSink, TracingSink};
pub use resolver::{
    path_to_slash, read_ignore_file, resolve, split_globs, GlobConfig, GlobRule, GlobSpec,
    VCS_EXCLUSION,
};
