use stackify_core::StackifyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Core(#[from] StackifyError),
}
