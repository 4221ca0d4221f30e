//! Lifecycle and control surface for the whole pipeline

use crate::coalesce::{Coalescer, EventSink, PathFilter, Sweeper};
use crate::config::SchedulerConfig;
use crate::error::{QueueFull, Result, SchedulerError};
use crate::event::{ChangeKind, RawChangeEvent};
use crate::extract::Extractor;
use crate::pool::{StopReport, WorkerPool};
use crate::queue::ReadyQueue;
use crate::status::{FailureEntry, StatusTracker, StatusSnapshot, SuccessEntry};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Operator-facing status of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub queue_size: usize,
    pub pending_count: usize,
    pub active_workers: usize,
    pub processed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub recent_failures: Vec<FailureEntry>,
    pub recent_successes: Vec<SuccessEntry>,
}

/// What `Scheduler::clear` discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub pending: usize,
    pub queued: usize,
}

/// Owns the coalescer, queue, worker pool and status tracker.
///
/// `Stopped -> Running -> Stopped`; `start` and `stop` are idempotent.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<ReadyQueue>,
    coalescer: Arc<Coalescer>,
    tracker: Arc<StatusTracker>,
    pool: WorkerPool,
    /// Present while running
    sweeper: Mutex<Option<Sweeper>>,
    /// Serializes `start` and `stop` without blocking status readers
    lifecycle: Mutex<()>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, extractor: Arc<dyn Extractor>) -> Self {
        Self::build(config, extractor, None)
    }

    /// Scheduler whose coalescer consults `filter` before accepting events
    pub fn with_filter(
        config: SchedulerConfig,
        extractor: Arc<dyn Extractor>,
        filter: Arc<dyn PathFilter>,
    ) -> Self {
        Self::build(config, extractor, Some(filter))
    }

    fn build(
        config: SchedulerConfig,
        extractor: Arc<dyn Extractor>,
        filter: Option<Arc<dyn PathFilter>>,
    ) -> Self {
        let queue = Arc::new(ReadyQueue::new(config.max_queue_size));
        let tracker = Arc::new(StatusTracker::new(config.history_size));

        let mut coalescer = Coalescer::from_config(&config, Arc::clone(&queue));
        if let Some(filter) = filter {
            coalescer = coalescer.with_filter(filter);
        }
        let coalescer = Arc::new(coalescer);

        let pool = WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&tracker),
            extractor,
            config.batch_size,
            config.dequeue_timeout(),
        )
        .with_requeue(coalescer.clone());

        Self {
            config,
            queue,
            coalescer,
            tracker,
            pool,
            sweeper: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Start the promotion sweep and the worker pool.
    ///
    /// Misconfiguration is the only fatal error.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.is_running() {
            debug!("Scheduler already running");
            return Ok(());
        }
        self.config.validate()?;

        let sweep = Sweeper::spawn(Arc::clone(&self.coalescer), self.config.sweep_interval()).map_err(
            |source| SchedulerError::Spawn {
                name: "settle-sweep".to_string(),
                source,
            },
        )?;
        if let Err(e) = self.pool.start(self.config.worker_threads) {
            sweep.stop();
            return Err(e);
        }

        *self.sweeper.lock() = Some(sweep);
        info!(
            workers = self.config.worker_threads,
            delay_seconds = self.config.delay_seconds,
            max_delay_seconds = self.config.max_delay_seconds,
            queue_capacity = self.config.max_queue_size,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the promotion sweep, then the worker pool.
    ///
    /// `is_running` reports false as soon as this is called; status stays
    /// readable while workers drain.
    pub fn stop(&self) -> StopReport {
        let _lifecycle = self.lifecycle.lock();
        let Some(sweep) = self.sweeper.lock().take() else {
            return StopReport::default();
        };

        sweep.stop();
        let report = self.pool.stop(self.config.stop_timeout());
        info!(
            pending = self.coalescer.pending_count(),
            queued = self.queue.size(),
            "Scheduler stopped"
        );
        report
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Feed one raw event into the coalescer
    pub fn ingest(&self, event: RawChangeEvent) {
        self.coalescer.ingest(event);
    }

    /// Queue `path` for processing now, skipping the debounce window
    pub fn force_process(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let kind = if path.exists() {
            ChangeKind::Modified
        } else {
            ChangeKind::Deleted
        };

        self.coalescer
            .force(path.clone(), kind)
            .map_err(|QueueFull(change)| SchedulerError::QueueFull(change.path))?;
        info!(path = %path.display(), ?kind, "Forced processing");
        Ok(())
    }

    /// Discard all pending and queued changes, e.g. before a full rescan
    pub fn clear(&self) -> ClearReport {
        let report = ClearReport {
            pending: self.coalescer.clear(),
            queued: self.queue.clear(),
        };
        info!(pending = report.pending, queued = report.queued, "Cleared pipeline state");
        report
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let StatusSnapshot {
            processed_count,
            failed_count,
            skipped_count,
            recent_successes,
            recent_failures,
            ..
        } = self.tracker.get_stats();

        SchedulerStatus {
            running: self.is_running(),
            queue_size: self.queue.size(),
            pending_count: self.coalescer.pending_count(),
            active_workers: self.pool.active_workers(),
            processed_count,
            failed_count,
            skipped_count,
            recent_failures,
            recent_successes,
        }
    }

    pub fn stats(&self) -> StatusSnapshot {
        self.tracker.get_stats()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.coalescer.is_pending(path)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl EventSink for Scheduler {
    fn ingest(&self, event: RawChangeEvent) {
        Scheduler::ingest(self, event)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
