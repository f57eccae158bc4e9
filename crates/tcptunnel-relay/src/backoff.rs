//! Exponential backoff for retrying transient accept failures

use std::time::Duration;
use tracing::debug;

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay returned by the first `next_backoff` after a reset
    pub initial_interval: Duration,
    /// Upper bound for a single delay
    pub max_interval: Duration,
    /// Growth factor applied after every delay
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
        }
    }
}

/// Exponential backoff without a total elapsed-time limit.
///
/// Delays never decrease between resets, and never exceed `max_interval`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_backoff: Duration,
    attempt: usize,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_backoff: config.initial_interval.min(config.max_interval),
            config,
            attempt: 0,
        }
    }

    /// Return the delay to wait now and grow the next one.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current_backoff;
        self.attempt += 1;

        // Grow in whole nanoseconds so integral multipliers stay exact
        let multiplier = self.config.multiplier.max(1.0);
        let grown = (self.current_backoff.as_nanos() as f64 * multiplier).round();
        self.current_backoff = if grown >= self.config.max_interval.as_nanos() as f64 {
            self.config.max_interval
        } else {
            Duration::from_nanos(grown as u64)
        };

        delay
    }

    /// Reset to the initial delay (call after a successful accept)
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!("Resetting accept backoff after {} attempts", self.attempt);
        }
        self.current_backoff = self.config.initial_interval.min(self.config.max_interval);
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Delay the next call to `next_backoff` will return
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
