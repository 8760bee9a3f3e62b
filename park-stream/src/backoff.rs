//! Reconnection policy and the abortable timer that drives it.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use park_core::config::ReconnectConfig;

/// Linear backoff with a capped number of attempts.
///
/// Attempt `n` (1-based) waits `base_interval * n`: with the defaults that is
/// 3s, 6s, 9s, 12s, 15s, then the client gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_interval: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_interval: Duration, max_attempts: u32) -> Self {
        Self {
            base_interval,
            max_attempts,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_interval(), config.max_attempts)
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(attempt)
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn should_reconnect(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

/// A pending reconnect: sleeps, then runs its task. Aborted by `cancel`.
#[derive(Debug)]
pub struct ReconnectTimer {
    handle: JoinHandle<()>,
    attempt: u32,
    delay: Duration,
}

impl ReconnectTimer {
    /// Spawn a timer that runs `task` after `delay`.
    pub fn schedule<F>(attempt: u32, delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            task.await;
        });
        Self {
            handle,
            attempt,
            delay,
        }
    }

    /// Abort the timer. Has no effect once the task has finished.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
