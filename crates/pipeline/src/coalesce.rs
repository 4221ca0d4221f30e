//! Per-path event coalescing
//!
//! Raw events are folded into one pending entry per path. A periodic sweep
//! promotes entries whose debounce window has elapsed into the Ready Queue.
//! The pending map is a sharded `DashMap`, so producers touching different
//! paths rarely contend.

use crate::config::SchedulerConfig;
use crate::error::QueueFull;
use crate::event::{ChangeKind, PendingChange, RawChangeEvent, RawEventKind, ReadyChange};
use crate::pool::Requeue;
use crate::queue::{QueuedFold, ReadyQueue};
use crossbeam_channel::{bounded, select, tick, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Decides which paths never enter the pipeline
pub trait PathFilter: Send + Sync {
    fn should_ignore(&self, path: &Path) -> bool;
}

/// Anything that accepts raw change events
pub trait EventSink: Send + Sync {
    fn ingest(&self, event: RawChangeEvent);
}

/// Counts from one promotion sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoteReport {
    pub promoted: usize,
    /// Due entries left pending because the queue was full
    pub deferred: usize,
}

/// Merges bursts of per-path events into stabilized changes
pub struct Coalescer {
    pending: DashMap<PathBuf, PendingChange>,
    queue: Arc<ReadyQueue>,
    filter: Option<Arc<dyn PathFilter>>,
    delay: Duration,
    max_delay: Duration,
    /// Set while due entries are waiting on a full queue
    backpressure: AtomicBool,
}

impl Coalescer {
    pub fn new(queue: Arc<ReadyQueue>, delay: Duration, max_delay: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            queue,
            filter: None,
            delay,
            max_delay: max_delay.max(delay),
            backpressure: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &SchedulerConfig, queue: Arc<ReadyQueue>) -> Self {
        Self::new(queue, config.delay(), config.max_delay())
    }

    pub fn with_filter(mut self, filter: Arc<dyn PathFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Absorb one raw event. Never blocks on anything but short critical sections.
    pub fn ingest(&self, event: RawChangeEvent) {
        if event.path.as_os_str().is_empty() {
            warn!(kind = ?event.kind, "Dropping change event with an empty path");
            return;
        }

        let ts = event.timestamp;
        match event.kind {
            RawEventKind::Created => self.apply(event.path, ChangeKind::Created, ts, None),
            RawEventKind::Modified => self.apply(event.path, ChangeKind::Modified, ts, None),
            RawEventKind::Deleted => self.apply(event.path, ChangeKind::Deleted, ts, None),
            RawEventKind::Renamed => {
                let Some(old_path) = event.old_path.filter(|p| !p.as_os_str().is_empty()) else {
                    warn!(path = %event.path.display(), "Dropping rename event without a source path");
                    return;
                };
                self.apply(old_path.clone(), ChangeKind::Deleted, ts, None);
                self.apply(event.path, ChangeKind::Created, ts, Some(old_path));
            }
        }
    }

    fn apply(&self, path: PathBuf, kind: ChangeKind, ts: Instant, old_path: Option<PathBuf>) {
        if let Some(filter) = &self.filter {
            if filter.should_ignore(&path) {
                trace!(path = %path.display(), "Ignored by path filter");
                return;
            }
        }

        match self.pending.entry(path) {
            Entry::Occupied(mut entry) => {
                let folded = entry.get().kind.fold(kind);
                match folded {
                    None => {
                        let removed = entry.remove();
                        debug!(path = %removed.path.display(), "Change cancelled out before promotion");
                    }
                    Some(net) => {
                        let pending = entry.get_mut();
                        pending.kind = net;
                        if old_path.is_some() {
                            pending.old_path = old_path;
                        }
                        self.reschedule(pending, ts);
                        trace!(path = %pending.path.display(), kind = ?net, "Coalesced change");
                    }
                }
            }
            Entry::Vacant(vacant) => {
                // Still holding the shard lock: a queued entry absorbs the
                // event instead of gaining a pending twin.
                match self.queue.fold_into(vacant.key(), kind, old_path.clone()) {
                    Some(QueuedFold::Updated(net)) => {
                        trace!(path = %vacant.key().display(), kind = ?net, "Folded into queued change");
                    }
                    Some(QueuedFold::Cancelled) => {
                        debug!(path = %vacant.key().display(), "Queued change cancelled out");
                    }
                    None => {
                        let path = vacant.key().clone();
                        debug!(path = %path.display(), kind = ?kind, "New pending change");
                        vacant.insert(PendingChange {
                            path,
                            kind,
                            first_seen: ts,
                            ready_at: deadline(ts, self.delay),
                            escalations: 0,
                            old_path,
                        });
                    }
                }
            }
        }
    }

    /// Push `ready_at` out by the debounce window, but never past the
    /// max-delay ceiling measured from the first event.
    fn reschedule(&self, pending: &mut PendingChange, now: Instant) {
        let wanted = deadline(now, self.delay);
        let ceiling = deadline(pending.first_seen, self.max_delay).max(now);
        if wanted > ceiling {
            pending.ready_at = ceiling;
            pending.escalations += 1;
        } else {
            pending.ready_at = wanted;
        }
    }

    /// Move every entry due at `now` into the Ready Queue
    pub fn promote(&self, now: Instant) -> PromoteReport {
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|entry| entry.ready_at <= now)
            .map(|entry| (entry.ready_at, entry.key().clone()))
            .collect();
        due.sort();

        let mut report = PromoteReport::default();
        let total = due.len();
        for (index, (_, path)) in due.into_iter().enumerate() {
            let Entry::Occupied(entry) = self.pending.entry(path) else {
                continue;
            };
            if entry.get().ready_at > now {
                // rescheduled since the scan
                continue;
            }
            let change = entry.get().to_ready();
            match self.queue.enqueue(change) {
                Ok(()) => {
                    entry.remove();
                    report.promoted += 1;
                }
                Err(QueueFull(_)) => {
                    report.deferred = total - index;
                    break;
                }
            }
        }

        self.note_backpressure(&report);
        if report.promoted > 0 {
            debug!(promoted = report.promoted, queued = self.queue.size(), "Promoted ready changes");
        }
        report
    }

    fn note_backpressure(&self, report: &PromoteReport) {
        let full = report.deferred > 0;
        let was_full = self.backpressure.swap(full, Ordering::Relaxed);
        if full && !was_full {
            warn!(
                deferred = report.deferred,
                capacity = self.queue.capacity(),
                "Ready queue full, deferring promotion to the next sweep"
            );
        } else if !full && was_full {
            info!("Ready queue has room again, promotion resumed");
        }
    }

    /// Return a dequeued but unprocessed change to the pipeline
    pub fn reinstate(&self, change: ReadyChange) {
        match self.pending.entry(change.path.clone()) {
            Entry::Occupied(mut entry) => {
                // Newer events arrived after the dequeue; the old change goes underneath.
                let folded = change.kind.fold(entry.get().kind);
                match folded {
                    None => {
                        entry.remove();
                    }
                    Some(net) => {
                        let pending = entry.get_mut();
                        pending.kind = net;
                        if pending.old_path.is_none() {
                            pending.old_path = change.old_path;
                        }
                    }
                }
            }
            Entry::Vacant(_vacant) => self.queue.requeue_front(change),
        }
    }

    /// Enqueue `path` immediately, taking over any pending entry for it.
    ///
    /// A path that is already queued is left as it is.
    pub fn force(&self, path: PathBuf, kind: ChangeKind) -> Result<(), QueueFull> {
        match self.pending.entry(path) {
            Entry::Occupied(entry) => {
                let mut change = entry.get().to_ready();
                change.kind = kind;
                self.queue.enqueue(change)?;
                entry.remove();
                Ok(())
            }
            Entry::Vacant(vacant) => {
                if self.queue.contains(vacant.key()) {
                    debug!(path = %vacant.key().display(), "Already queued, nothing to force");
                    return Ok(());
                }
                self.queue.enqueue(ReadyChange::new(vacant.key().clone(), kind))
            }
        }
    }

    /// Drop all pending state, returning how many entries were discarded
    pub fn clear(&self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Copy of the pending entry for `path`, if any
    pub fn pending(&self, path: &Path) -> Option<PendingChange> {
        self.pending.get(path).map(|entry| entry.value().clone())
    }

    pub fn queue(&self) -> &Arc<ReadyQueue> {
        &self.queue
    }
}

impl EventSink for Coalescer {
    fn ingest(&self, event: RawChangeEvent) {
        Coalescer::ingest(self, event)
    }
}

impl Requeue for Coalescer {
    fn requeue(&self, change: ReadyChange) {
        self.reinstate(change)
    }
}

/// `from + by`; an unrepresentable instant makes the entry due at `from`
fn deadline(from: Instant, by: Duration) -> Instant {
    from.checked_add(by).unwrap_or(from)
}

/// Background thread driving `Coalescer::promote`
pub struct Sweeper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(coalescer: Arc<Coalescer>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("settle-sweep".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                debug!(?interval, "Promotion sweep started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            coalescer.promote(Instant::now());
                        }
                    }
                }
                debug!("Promotion sweep stopped");
            })?;

        Ok(Self { stop_tx, handle })
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            warn!("Promotion sweep thread panicked");
        }
    }
}
