//! Backoff timing for restarting failed controllers and retrying external
//! commands.
use std::time::Duration;

use rand::Rng;

/// Determines how long to back off before performing a retry.
#[async_trait::async_trait]
pub trait BackoffStrategy: Send {
    /// Resets the strategy after a success.
    fn reset(&mut self);
    /// Gets how long to wait before retrying.
    fn next_duration(&mut self) -> Duration;
    /// Waits the prescribed amount of time (as per `next_duration`).
    async fn wait(&mut self) {
        tokio::time::sleep(self.next_duration()).await
    }
}

/// A `BackoffStrategy` in which the durations increase exponentially
/// until hitting a cap.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffStrategy {
    base_duration: Duration,
    cap: Duration,
    last_duration: Duration,
}

impl Default for ExponentialBackoffStrategy {
    /// One second doubling up to a minute, the pace controller restarts use.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl ExponentialBackoffStrategy {
    /// A strategy starting at `base_duration` and never exceeding `cap`.
    pub fn new(base_duration: Duration, cap: Duration) -> Self {
        Self {
            base_duration,
            cap,
            last_duration: Duration::from_secs(0),
        }
    }

    fn capped_next_duration(&self) -> Duration {
        let next_duration = if self.last_duration == Duration::from_secs(0) {
            self.base_duration
        } else {
            self.last_duration * 2
        };

        next_duration.min(self.cap)
    }
}

impl BackoffStrategy for ExponentialBackoffStrategy {
    fn reset(&mut self) {
        self.last_duration = Duration::from_secs(0);
    }

    fn next_duration(&mut self) -> Duration {
        let next_duration = self.capped_next_duration();
        self.last_duration = next_duration;
        next_duration
    }
}

/// A `BackoffStrategy` that waits a constant interval plus a random jitter.
#[derive(Clone, Debug)]
pub struct JitterBackoffStrategy {
    interval: Duration,
    jitter: Duration,
}

impl JitterBackoffStrategy {
    /// Waits `interval` plus up to `jitter` on every retry.
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }
}

impl BackoffStrategy for JitterBackoffStrategy {
    fn reset(&mut self) {}

    fn next_duration(&mut self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
