//! Filesystem event sources for settle
//!
//! This crate feeds the pipeline with:
//! - Native recursive watching (notify) translated into raw change events
//! - Ignore rules (built-ins, user globs, `.gitignore`)
//! - Periodic mtime-based reconciliation for events the backend missed

pub mod fs_watcher;
pub mod ignore;
pub mod reconcile;

pub use fs_watcher::{translate, FsWatcher, WatchError};
pub use self::ignore::{IgnoreConfig, IgnoreRules};
pub use reconcile::{full_scan, scan_since, PeriodicReconciler};
