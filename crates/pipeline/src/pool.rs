//! Fixed-size worker pool draining the Ready Queue

use crate::error::{ConfigError, SchedulerError};
use crate::event::{ChangeKind, Outcome, ProcessingResult, ReadyChange};
use crate::extract::Extractor;
use crate::queue::ReadyQueue;
use crate::status::StatusTracker;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where workers hand back changes they dequeued but never processed
pub trait Requeue: Send + Sync {
    fn requeue(&self, change: ReadyChange);
}

/// Lifecycle of a single worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Idle,
    Processing,
    Stopping,
    Terminated,
}

struct Slot {
    state: WorkerState,
    in_flight: Option<PathBuf>,
}

type SharedSlot = Arc<Mutex<Slot>>;

/// Outcome of `WorkerPool::stop`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub joined: usize,
    /// In-flight paths of workers that missed the join deadline
    pub abandoned: Vec<Option<PathBuf>>,
}

struct Running {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    slots: Vec<SharedSlot>,
    done_rx: Receiver<usize>,
}

/// Bounded set of threads invoking the extractor
pub struct WorkerPool {
    queue: Arc<ReadyQueue>,
    tracker: Arc<StatusTracker>,
    extractor: Arc<dyn Extractor>,
    requeue: Option<Arc<dyn Requeue>>,
    batch_size: usize,
    dequeue_timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<ReadyQueue>,
        tracker: Arc<StatusTracker>,
        extractor: Arc<dyn Extractor>,
        batch_size: usize,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            tracker,
            extractor,
            requeue: None,
            batch_size: batch_size.max(1),
            dequeue_timeout,
            running: Mutex::new(None),
        }
    }

    /// Route unprocessed changes through `requeue` on shutdown instead of
    /// straight back into the queue
    pub fn with_requeue(mut self, requeue: Arc<dyn Requeue>) -> Self {
        self.requeue = Some(requeue);
        self
    }

    /// Spawn `n_workers` threads. A no-op if the pool is already running.
    pub fn start(&self, n_workers: usize) -> Result<(), SchedulerError> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Worker pool already running");
            return Ok(());
        }
        if n_workers == 0 {
            return Err(ConfigError::WorkerThreads {
                got: 0,
                max: crate::config::MAX_WORKER_THREADS,
            }
            .into());
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = unbounded();
        let mut handles = Vec::with_capacity(n_workers);
        let mut slots = Vec::with_capacity(n_workers);

        for id in 0..n_workers {
            let slot = Arc::new(Mutex::new(Slot {
                state: WorkerState::Idle,
                in_flight: None,
            }));
            let worker = Worker {
                id,
                queue: Arc::clone(&self.queue),
                tracker: Arc::clone(&self.tracker),
                extractor: Arc::clone(&self.extractor),
                requeue: self.requeue.clone(),
                shutdown: Arc::clone(&shutdown),
                slot: Arc::clone(&slot),
                batch_size: self.batch_size,
                dequeue_timeout: self.dequeue_timeout,
            };
            let done = DoneSignal { id, tx: done_tx.clone() };

            let name = format!("settle-worker-{id}");
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                let _done = done;
                worker.run();
            });
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    slots.push(slot);
                }
                Err(source) => {
                    shutdown.store(true, Ordering::Release);
                    self.queue.wake_all();
                    return Err(SchedulerError::Spawn { name, source });
                }
            }
        }

        info!(workers = n_workers, batch_size = self.batch_size, "Worker pool started");
        *running = Some(Running {
            shutdown,
            handles,
            slots,
            done_rx,
        });
        Ok(())
    }

    /// Ask workers to finish their current item and exit, waiting at most
    /// `timeout` for them. Workers past the deadline are detached.
    pub fn stop(&self, timeout: Duration) -> StopReport {
        let Some(running) = self.running.lock().take() else {
            return StopReport::default();
        };

        running.shutdown.store(true, Ordering::Release);
        self.queue.wake_all();

        let deadline = Instant::now().checked_add(timeout);
        let mut finished = HashSet::new();
        while finished.len() < running.handles.len() {
            let done = match deadline {
                Some(deadline) => running.done_rx.recv_deadline(deadline).ok(),
                None => running.done_rx.recv().ok(),
            };
            match done {
                Some(id) => {
                    finished.insert(id);
                }
                None => break,
            }
        }

        let mut report = StopReport::default();
        for (id, handle) in running.handles.into_iter().enumerate() {
            if finished.contains(&id) {
                if handle.join().is_err() {
                    warn!(worker = id, "Worker thread panicked");
                }
                report.joined += 1;
            } else {
                let in_flight = running.slots[id].lock().in_flight.clone();
                warn!(
                    worker = id,
                    path = ?in_flight,
                    "Worker did not stop in time, abandoning its in-flight item"
                );
                report.abandoned.push(in_flight);
            }
        }

        info!(joined = report.joined, abandoned = report.abandoned.len(), "Worker pool stopped");
        report
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Workers currently inside the extractor
    pub fn active_workers(&self) -> usize {
        self.running.lock().as_ref().map_or(0, |running| {
            running
                .slots
                .iter()
                .filter(|slot| slot.lock().state == WorkerState::Processing)
                .count()
        })
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.running.lock().as_ref().map_or_else(Vec::new, |running| {
            running.slots.iter().map(|slot| slot.lock().state).collect()
        })
    }
}

/// Tells `stop` a worker has exited, even if it unwinds
struct DoneSignal {
    id: usize,
    tx: Sender<usize>,
}

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

struct Worker {
    id: usize,
    queue: Arc<ReadyQueue>,
    tracker: Arc<StatusTracker>,
    extractor: Arc<dyn Extractor>,
    requeue: Option<Arc<dyn Requeue>>,
    shutdown: Arc<AtomicBool>,
    slot: SharedSlot,
    batch_size: usize,
    dequeue_timeout: Duration,
}

impl Worker {
    fn run(self) {
        debug!(worker = self.id, "Worker started");

        while !self.stopping() {
            let mut batch = self.queue.dequeue_batch(self.batch_size, self.dequeue_timeout).into_iter();

            while let Some(change) = batch.next() {
                if self.stopping() {
                    let rest: Vec<ReadyChange> = std::iter::once(change).chain(batch).collect();
                    self.hand_back(rest);
                    break;
                }

                self.set_state(WorkerState::Processing, Some(change.path.clone()));
                let result = process(self.extractor.as_ref(), &change);
                self.report(&result);
                self.set_state(WorkerState::Idle, None);
            }
        }

        self.set_state(WorkerState::Stopping, None);
        debug!(worker = self.id, "Worker exiting");
        self.set_state(WorkerState::Terminated, None);
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn set_state(&self, state: WorkerState, in_flight: Option<PathBuf>) {
        let mut slot = self.slot.lock();
        slot.state = state;
        slot.in_flight = in_flight;
    }

    fn report(&self, result: &ProcessingResult) {
        match result.outcome {
            Outcome::Success => {
                debug!(worker = self.id, path = %result.path.display(), elapsed = ?result.duration, "Processed");
            }
            Outcome::Skipped => {
                debug!(worker = self.id, path = %result.path.display(), "Skipped, file no longer exists");
            }
            Outcome::Failure => {
                warn!(
                    worker = self.id,
                    path = %result.path.display(),
                    error = result.error.as_deref().unwrap_or("unknown error"),
                    "Processing failed"
                );
            }
        }
        self.tracker.record(result);
    }

    /// Return unprocessed changes, newest first, so they end up in their
    /// original order at the head of the queue
    fn hand_back(&self, rest: Vec<ReadyChange>) {
        debug!(worker = self.id, count = rest.len(), "Handing back unprocessed changes");
        for change in rest.into_iter().rev() {
            match &self.requeue {
                Some(requeue) => requeue.requeue(change),
                None => self.queue.requeue_front(change),
            }
        }
    }
}

/// Process one ready change against `extractor`.
///
/// Never panics and never returns an error: every failure mode is folded
/// into the returned outcome.
pub fn process(extractor: &dyn Extractor, change: &ReadyChange) -> ProcessingResult {
    let start = Instant::now();
    let path = &change.path;

    let attempt = catch_unwind(AssertUnwindSafe(|| match change.kind {
        ChangeKind::Deleted => extractor.remove(path).map(|()| Outcome::Success),
        ChangeKind::Created | ChangeKind::Modified => {
            // a delete may have raced the debounce window
            if !path.exists() {
                return Ok(Outcome::Skipped);
            }
            extractor.extract(path).map(|metadata| {
                debug!(path = %path.display(), size = metadata.size_bytes, "Extracted metadata");
                Outcome::Success
            })
        }
    }));

    let (outcome, error) = match attempt {
        Ok(Ok(outcome)) => (outcome, None),
        Ok(Err(e)) if e.is_not_found() => (Outcome::Skipped, None),
        Ok(Err(e)) => (Outcome::Failure, Some(e.to_string())),
        Err(panic) => (
            Outcome::Failure,
            Some(format!("extractor panicked: {}", panic_message(&*panic))),
        ),
    };

    ProcessingResult {
        path: path.clone(),
        outcome,
        error,
        duration: start.elapsed(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
