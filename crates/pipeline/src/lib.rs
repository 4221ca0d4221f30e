//! Change coalescing and dispatch for settle
//!
//! This crate turns a noisy stream of raw filesystem events into stabilized
//! "needs processing" signals:
//! - Per-path coalescing with a debounce window and a hard latency ceiling
//! - A bounded Ready Queue that pushes back instead of dropping
//! - A fixed-size worker pool invoking a pluggable extractor
//! - Status counters and recent history
//!
//! Event sources, ignore rules and extractors are supplied by the caller.

pub mod coalesce;
pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod status;

// Re-exports
pub use coalesce::{Coalescer, EventSink, PathFilter, PromoteReport};
pub use config::SchedulerConfig;
pub use error::{ConfigError, ExtractError, QueueFull, SchedulerError};
pub use event::{ChangeKind, Outcome, PendingChange, ProcessingResult, RawChangeEvent, RawEventKind, ReadyChange};
pub use extract::{Extractor, Metadata};
pub use pool::{Requeue, StopReport, WorkerPool, WorkerState};
pub use queue::ReadyQueue;
pub use scheduler::{ClearReport, Scheduler, SchedulerStatus};
pub use status::{StatusSnapshot, StatusTracker};
