//! Stackify Watcher - file watching and watch sessions
//!
//! This crate handles the "react to changes" half of Stackify:
//! - Watching directory trees with debounced notify watchers
//! - Turning raw events into Created / Modified / Deleted triggers
//! - Filtering triggers through a resolved [`stackify_core::GlobSpec`]
//! - Starting, stopping and waiting on a watch session
//!
//! The engines only implement [`ChangeHandler`]; everything about OS
//! handles and their lifetimes lives here.

mod error;
mod session;
mod watcher;

pub use error::WatchError;
pub use session::{ChangeHandler, WatchController, WatchOptions, WatchRoot};
pub use watcher::{FileChange, FileWatcher, DEFAULT_DEBOUNCE};
