//! Error types for glob resolution and file access.
//!
//! We keep errors simple and actionable. Each variant names the path
//! that caused it so the message is useful without a backtrace.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions that can fail in this crate.
pub type Result<T> = std::result::Result<T, StackifyError>;

/// Things that can go wrong while resolving or expanding globs.
#[derive(Error, Debug)]
pub enum StackifyError {
    /// Couldn't read or write something on disk.
    #[error("I/O error on '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured root directory does not exist or is not a directory.
    #[error("root directory not found: '{0}'")]
    RootNotFound(PathBuf),

    /// A configuration value or file is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StackifyError {
    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }
}
