//! Minimum-interval gate for deep-tier calls.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Global minimum interval between deep-tier call starts.
///
/// Independent of the deep concurrency limit: even with free permits, two
/// calls never start closer together than `min_interval`. The lock is held
/// across the wait, and tokio's mutex is fair, so callers queue in arrival
/// order instead of bursting when the interval elapses.
#[derive(Debug)]
pub struct DeepTierGate {
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl DeepTierGate {
    /// Creates a gate.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Mutex::const_new(None),
        }
    }

    /// Configured interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits for this caller's turn and records its start time.
    ///
    /// Returns how long the caller waited after acquiring the queue slot.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_start.lock().await;
        let waited = match *last {
            Some(previous) => {
                let ready_at = previous + self.min_interval;
                let now = Instant::now();
                if ready_at > now {
                    tokio::time::sleep_until(ready_at.into()).await;
                    ready_at - now
                } else {
                    Duration::ZERO
                }
            },
            None => Duration::ZERO,
        };
        *last = Some(Instant::now());
        drop(last);

        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("deep_rate_limit_wait_ms").record(waited.as_millis() as f64);
        waited
    }
}
