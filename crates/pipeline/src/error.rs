//! Error types for the change pipeline

use crate::event::ReadyChange;
use std::path::PathBuf;
use thiserror::Error;

/// Misconfiguration detected when the scheduler starts
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("worker_threads must be between 1 and {max}, got {got}")]
    WorkerThreads { got: usize, max: usize },

    #[error("max_queue_size must be at least 1")]
    ZeroQueueSize,

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("sweep_interval_ms must be at least 1")]
    ZeroSweepInterval,

    #[error("{field} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDelay { field: &'static str, value: f64 },

    #[error("{field} must be at most {max} seconds, got {value}")]
    DelayTooLarge { field: &'static str, value: f64, max: f64 },

    #[error("history_size must be at most {max}, got {got}")]
    HistoryTooLarge { got: usize, max: usize },

    #[error("max_delay_seconds ({max}) must not be smaller than delay_seconds ({delay})")]
    CeilingBelowDelay { delay: f64, max: f64 },
}

/// Failure reported by an extractor
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction failed: {0}")]
    Failed(String),
}

impl ExtractError {
    /// True when the file disappeared underneath the extractor
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtractError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Ready Queue at capacity; carries the rejected change back to the caller
#[derive(Debug, Error)]
#[error("ready queue is full, {} must be retried", .0.path.display())]
pub struct QueueFull(pub ReadyChange);

/// Errors surfaced by the scheduler's control operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("ready queue is full, cannot force {}", .0.display())]
    QueueFull(PathBuf),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
