//! Processing counters and recent history

use crate::event::{Outcome, ProcessingResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A successfully processed path
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEntry {
    pub path: PathBuf,
    pub at_unix_ms: u64,
    pub duration_ms: u64,
}

/// A path whose processing failed
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub path: PathBuf,
    pub error: String,
    pub at_unix_ms: u64,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub processed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub uptime: Duration,
    /// Completed items (success or failure) per second of uptime
    pub throughput: f64,
    pub recent_successes: Vec<SuccessEntry>,
    pub recent_failures: Vec<FailureEntry>,
}

struct History {
    successes: VecDeque<SuccessEntry>,
    failures: VecDeque<FailureEntry>,
}

/// Aggregates worker outcomes
pub struct StatusTracker {
    started: Instant,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    history: Mutex<History>,
    history_size: usize,
}

impl StatusTracker {
    pub fn new(history_size: usize) -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            history: Mutex::new(History {
                successes: VecDeque::with_capacity(history_size.min(1024)),
                failures: VecDeque::with_capacity(history_size.min(1024)),
            }),
            history_size,
        }
    }

    pub fn record(&self, result: &ProcessingResult) {
        match result.outcome {
            Outcome::Success => self.report_success(&result.path, result.duration),
            Outcome::Skipped => self.report_skipped(&result.path),
            Outcome::Failure => self.report_failure(
                &result.path,
                result.error.as_deref().unwrap_or("unknown error"),
            ),
        }
    }

    pub fn report_success(&self, path: &Path, duration: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let entry = SuccessEntry {
            path: path.to_path_buf(),
            at_unix_ms: now_unix_ms(),
            duration_ms: duration.as_millis() as u64,
        };
        push_bounded(&mut self.history.lock().successes, entry, self.history_size);
    }

    pub fn report_failure(&self, path: &Path, error: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let entry = FailureEntry {
            path: path.to_path_buf(),
            error: error.to_string(),
            at_unix_ms: now_unix_ms(),
        };
        push_bounded(&mut self.history.lock().failures, entry, self.history_size);
    }

    pub fn report_skipped(&self, _path: &Path) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> StatusSnapshot {
        let processed_count = self.processed_count();
        let failed_count = self.failed_count();
        let uptime = self.started.elapsed();
        let secs = uptime.as_secs_f64();
        let throughput = if secs > 0.0 {
            (processed_count + failed_count) as f64 / secs
        } else {
            0.0
        };

        let history = self.history.lock();
        StatusSnapshot {
            processed_count,
            failed_count,
            skipped_count: self.skipped_count(),
            uptime,
            throughput,
            recent_successes: history.successes.iter().cloned().collect(),
            recent_failures: history.failures.iter().cloned().collect(),
        }
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, entry: T, cap: usize) {
    if cap == 0 {
        return;
    }
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(entry);
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let tracker = StatusTracker::new(10);
        tracker.report_success(Path::new("a"), Duration::from_millis(5));
        tracker.report_success(Path::new("b"), Duration::from_millis(5));
        tracker.report_failure(Path::new("c"), "boom");
        tracker.report_skipped(Path::new("d"));

        let stats = tracker.get_stats();
        assert_eq!(stats.processed_count, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.skipped_count, 1);
        assert_eq!(stats.recent_failures[0].error, "boom");
    }

    #[test]
    fn test_history_is_bounded() {
        let tracker = StatusTracker::new(3);
        for i in 0..10 {
            tracker.report_success(Path::new(&format!("file-{i}")), Duration::ZERO);
        }

        let stats = tracker.get_stats();
        assert_eq!(stats.processed_count, 10);
        let paths: Vec<_> = stats.recent_successes.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("file-7"), PathBuf::from("file-8"), PathBuf::from("file-9")]
        );
    }

    #[test]
    fn test_record_dispatches_on_outcome() {
        let tracker = StatusTracker::new(10);
        tracker.record(&ProcessingResult {
            path: PathBuf::from("x"),
            outcome: Outcome::Failure,
            error: None,
            duration: Duration::ZERO,
        });

        let stats = tracker.get_stats();
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.recent_failures[0].error, "unknown error");
    }

    #[test]
    fn test_zero_history_keeps_counting() {
        let tracker = StatusTracker::new(0);
        tracker.report_failure(Path::new("x"), "nope");
        let stats = tracker.get_stats();
        assert_eq!(stats.failed_count, 1);
        assert!(stats.recent_failures.is_empty());
    }

    #[test]
    fn test_huge_history_size_does_not_preallocate() {
        let tracker = StatusTracker::new(usize::MAX);
        tracker.report_success(Path::new("a"), Duration::ZERO);
        assert_eq!(tracker.get_stats().recent_successes.len(), 1);
    }
}
