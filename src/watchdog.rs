//! Reconciliation watchdog
//!
//! The reconciliation loop calls [`Heartbeat::wake`] once per cycle. If the
//! loop hangs, [`Watchdog::expired`] resolves and the daemon exits so the
//! service manager can restart it.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Receives proof of progress from a periodic task
pub trait Heartbeat: Send + Sync {
    /// Signal that the task completed another round
    fn wake(&self);
}

/// Tracks the most recent heartbeat
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    last_wake: Mutex<Instant>,
}

impl Watchdog {
    /// Create a watchdog that considers the task hung after `timeout` without a wake
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_wake: Mutex::new(Instant::now()),
        }
    }

    /// Time since the last heartbeat
    #[must_use]
    pub fn since_last_wake(&self) -> Duration {
        self.last().elapsed()
    }

    /// Resolve once no heartbeat arrived within the timeout
    pub async fn expired(&self) {
        loop {
            let deadline = self.last() + self.timeout;
            if Instant::now() >= deadline {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "no reconciliation heartbeat within timeout"
                );
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn last(&self) -> Instant {
        *self
            .last_wake
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Heartbeat for Watchdog {
    fn wake(&self) {
        let mut last = self
            .last_wake
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Instant::now();
        tracing::trace!("watchdog woken");
    }
}
