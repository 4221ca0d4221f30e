//! Scheduler configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on the worker pool size
pub const MAX_WORKER_THREADS: usize = 64;

/// Upper bound on `delay_seconds` and `max_delay_seconds` (one year)
pub const MAX_DELAY_SECONDS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Upper bound on each recent-history ring
pub const MAX_HISTORY_SIZE: usize = 10_000;

/// Tuning knobs for the coalescer, queue and worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Debounce window: quiet time required before a path is promoted
    pub delay_seconds: f64,

    /// Hard ceiling on time from first event to promotion
    pub max_delay_seconds: f64,

    /// Number of worker threads
    pub worker_threads: usize,

    /// Ready Queue capacity
    pub max_queue_size: usize,

    /// Items a worker takes from the queue at once
    pub batch_size: usize,

    /// Promotion sweep period
    pub sweep_interval_ms: u64,

    /// How long an idle worker waits on the queue before re-checking for shutdown
    pub dequeue_timeout_ms: u64,

    /// Bounded join timeout for pool shutdown
    pub stop_timeout_ms: u64,

    /// Entries kept in each recent-history ring
    pub history_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 2.0,
            max_delay_seconds: 30.0,
            worker_threads: 4,
            max_queue_size: 1_000,
            batch_size: 8,
            sweep_interval_ms: 250,
            dequeue_timeout_ms: 200,
            stop_timeout_ms: 5_000,
            history_size: 50,
        }
    }
}

impl SchedulerConfig {
    /// Check every field, returning the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::WorkerThreads {
                got: self.worker_threads,
                max: MAX_WORKER_THREADS,
            });
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        check_seconds("delay_seconds", self.delay_seconds)?;
        check_seconds("max_delay_seconds", self.max_delay_seconds)?;
        if self.history_size > MAX_HISTORY_SIZE {
            return Err(ConfigError::HistoryTooLarge {
                got: self.history_size,
                max: MAX_HISTORY_SIZE,
            });
        }
        if self.max_delay_seconds < self.delay_seconds {
            return Err(ConfigError::CeilingBelowDelay {
                delay: self.delay_seconds,
                max: self.max_delay_seconds,
            });
        }
        Ok(())
    }

    /// Debounce window, clamped into `0..=MAX_DELAY_SECONDS`
    pub fn delay(&self) -> Duration {
        seconds(self.delay_seconds)
    }

    /// Latency ceiling, clamped into `0..=MAX_DELAY_SECONDS`
    pub fn max_delay(&self) -> Duration {
        seconds(self.max_delay_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn check_seconds(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(ConfigError::InvalidDelay { field, value });
    }
    if value > MAX_DELAY_SECONDS {
        return Err(ConfigError::DelayTooLarge {
            field,
            value,
            max: MAX_DELAY_SECONDS,
        });
    }
    Ok(())
}

// Unvalidated configs still reach the accessors through `Scheduler::new`
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_DELAY_SECONDS)).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(SchedulerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = SchedulerConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::WorkerThreads { got: 0, max: MAX_WORKER_THREADS })
        );
    }

    #[test]
    fn test_ceiling_below_delay_rejected() {
        let config = SchedulerConfig {
            delay_seconds: 10.0,
            max_delay_seconds: 5.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CeilingBelowDelay { .. })
        ));
    }

    #[test]
    fn test_nan_delay_rejected() {
        let config = SchedulerConfig {
            delay_seconds: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDelay { field: "delay_seconds", .. })
        ));
    }

    #[test]
    fn test_huge_delays_rejected_without_panicking() {
        let config = SchedulerConfig {
            delay_seconds: 1e300,
            max_delay_seconds: 1e300,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelayTooLarge { field: "delay_seconds", .. })
        ));

        let max_year = Duration::from_secs_f64(MAX_DELAY_SECONDS);
        assert_eq!(config.delay(), max_year);
        assert_eq!(config.max_delay(), max_year);

        let config = SchedulerConfig {
            max_delay_seconds: 1e19,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelayTooLarge { field: "max_delay_seconds", .. })
        ));
    }

    #[test]
    fn test_delay_accessors_tolerate_garbage() {
        let config = SchedulerConfig {
            delay_seconds: -3.0,
            max_delay_seconds: f64::NAN,
            ..Default::default()
        };
        assert_eq!(config.delay(), Duration::ZERO);
        assert!(config.max_delay() <= Duration::from_secs_f64(MAX_DELAY_SECONDS));
    }

    #[test]
    fn test_oversized_history_rejected() {
        let config = SchedulerConfig {
            history_size: usize::MAX,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::HistoryTooLarge { got: usize::MAX, max: MAX_HISTORY_SIZE })
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SchedulerConfig = toml::from_str("worker_threads = 2\ndelay_seconds = 0.5\n").unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.delay(), Duration::from_millis(500));
        assert_eq!(config.max_queue_size, SchedulerConfig::default().max_queue_size);
    }
}
