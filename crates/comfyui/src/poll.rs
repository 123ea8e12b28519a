//! Bounded fixed-interval polling.
//!
//! Both the startup health probe and the history poll retry at a fixed
//! interval up to an attempt budget. Each wait is raced against a
//! [`CancellationToken`] so an invocation deadline stops the loop
//! promptly.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Interval and attempt budget for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between consecutive attempts.
    pub interval: Duration,
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Daemon startup probe: 1s interval, 60 attempts.
    pub fn startup() -> Self {
        Self::new(Duration::from_secs(1), 60)
    }

    /// History poll: 2s interval, 150 attempts.
    pub fn history() -> Self {
        Self::new(Duration::from_secs(2), 150)
    }

    /// Worst-case wall time spent waiting.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Sleep for `interval` unless `cancel` fires first.
///
/// Returns `false` if the wait was cut short by cancellation.
pub async fn pause(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
