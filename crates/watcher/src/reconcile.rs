//! Periodic reconciliation scanner
//!
//! Walks the watched tree looking for files modified since the previous scan
//! that the native watcher may have missed (queue overflow, races at startup,
//! network filesystems).

use anyhow::{Context, Result};
use pipeline::PathFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Periodic reconciliation scanner
pub struct PeriodicReconciler {
    /// Watched root directory
    root: PathBuf,

    /// Scan interval
    interval: Duration,

    /// Paths rejected here are neither reported nor descended into
    filter: Arc<dyn PathFilter>,

    /// Start time of the previous scan (used for mtime comparison)
    last_scan: SystemTime,

    /// Sender for detected changes
    change_tx: mpsc::Sender<Vec<PathBuf>>,
}

impl PeriodicReconciler {
    pub fn new(
        root: PathBuf,
        interval: Duration,
        filter: Arc<dyn PathFilter>,
        change_tx: mpsc::Sender<Vec<PathBuf>>,
    ) -> Self {
        Self {
            root,
            interval,
            filter,
            last_scan: SystemTime::now(),
            change_tx,
        }
    }

    /// Run the reconciliation loop until the receiver is dropped
    pub async fn run(mut self) -> Result<()> {
        let mut timer = interval(self.interval);

        info!(interval = ?self.interval, "Starting periodic reconciliation");

        loop {
            timer.tick().await;

            let started = SystemTime::now();
            let root = self.root.clone();
            let filter = Arc::clone(&self.filter);
            let since = self.last_scan;

            let scan = tokio::task::spawn_blocking(move || scan_since(&root, filter.as_ref(), since))
                .await
                .context("Reconciliation scan task panicked")?;

            match scan {
                Ok(changed) => {
                    self.last_scan = started;
                    if changed.is_empty() {
                        debug!("Periodic reconciliation: no missed changes");
                        continue;
                    }

                    info!(count = changed.len(), "Periodic reconciliation found missed changes");
                    if self.change_tx.send(changed).await.is_err() {
                        debug!("Reconciliation receiver closed, stopping");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Periodic reconciliation scan failed");
                }
            }
        }
    }
}

/// Files under `root` whose mtime is newer than `since`
///
/// Entries that vanish mid-walk are skipped.
pub fn scan_since(root: &Path, filter: &dyn PathFilter, since: SystemTime) -> Result<Vec<PathBuf>> {
    walk(root, filter, |modified| modified > since)
}

/// Every non-ignored file under `root`
pub fn full_scan(root: &Path, filter: &dyn PathFilter) -> Result<Vec<PathBuf>> {
    walk(root, filter, |_| true)
}

fn walk(
    root: &Path,
    filter: &dyn PathFilter,
    mut wanted: impl FnMut(SystemTime) -> bool,
) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !filter.should_ignore(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(&e) => continue,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| format!("Cannot scan {}", root.display()));
            }
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            _ => continue,
        };

        if wanted(modified) {
            found.push(entry.into_path());
        }
    }

    Ok(found)
}

fn is_vanished(err: &walkdir::Error) -> bool {
    err.depth() > 0
        && err
            .io_error()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct NoFilter;

    impl PathFilter for NoFilter {
        fn should_ignore(&self, _path: &Path) -> bool {
            false
        }
    }

    struct SkipDir(&'static str);

    impl PathFilter for SkipDir {
        fn should_ignore(&self, path: &Path) -> bool {
            path.components().any(|c| c.as_os_str() == self.0)
        }
    }

    #[tokio::test]
    async fn test_reconciliation_finds_missed_changes() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let file1 = root.join("file1.txt");
        let file2 = root.join("file2.txt");
        fs::write(&file1, b"content 1").unwrap();
        fs::write(&file2, b"content 2").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let reconciler =
            PeriodicReconciler::new(root.to_path_buf(), Duration::from_secs(1), Arc::new(NoFilter), tx);

        tokio::spawn(reconciler.run());

        // Let the first (empty) scan pass
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Modify file behind the watcher's back
        fs::write(&file1, b"modified content").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(changed, vec![file1]);
    }

    #[tokio::test]
    async fn test_reconciliation_ignores_unchanged_files() {
        use filetime::{set_file_mtime, FileTime};

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let file = root.join("old.txt");
        fs::write(&file, b"old").unwrap();

        // Backdate mtime to 10 minutes ago
        let old_time = SystemTime::now() - Duration::from_secs(600);
        set_file_mtime(&file, FileTime::from_system_time(old_time)).unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let reconciler = PeriodicReconciler::new(
            root.to_path_buf(),
            Duration::from_millis(100),
            Arc::new(NoFilter),
            tx,
        );

        tokio::spawn(reconciler.run());
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scan_since_uses_mtime() -> Result<()> {
        use filetime::{set_file_mtime, FileTime};

        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        let checkpoint = SystemTime::now() - Duration::from_secs(60);

        let stale = root.join("stale.txt");
        let fresh = root.join("nested/fresh.txt");
        fs::create_dir_all(root.join("nested"))?;
        fs::write(&stale, b"stale")?;
        fs::write(&fresh, b"fresh")?;
        set_file_mtime(&stale, FileTime::from_system_time(checkpoint - Duration::from_secs(60)))?;

        let changed = scan_since(root, &NoFilter, checkpoint)?;
        assert_eq!(changed, vec![fresh]);
        Ok(())
    }

    #[test]
    fn test_filter_prunes_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("target/debug"))?;
        fs::create_dir_all(root.join("src"))?;
        fs::write(root.join("target/debug/app"), b"bin")?;
        fs::write(root.join("src/main.rs"), b"fn main() {}")?;

        let files = full_scan(root, &SkipDir("target"))?;
        assert_eq!(files, vec![root.join("src/main.rs")]);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");

        assert!(full_scan(&missing, &NoFilter).is_err());
    }
}
