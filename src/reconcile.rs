//! Periodic directory reconciliation
//!
//! Every cycle waits for the refresh interval, wakes the watchdog, refreshes
//! all known devices concurrently, writes back the ones that answered, purges
//! devices that have gone unseen for too long and logs activity since the
//! previous cycle. The next cycle is only scheduled once the current one has
//! finished, so a slow cycle never overlaps the next.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::watch;

use crate::Result;
use crate::config::Config;
use crate::db::{DeviceRecord, DeviceStore};
use crate::devices::DeviceStatus;
use crate::stats::{Call, CallCounts, CallStatistics};
use crate::watchdog::Heartbeat;

/// Outcome of one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices in the snapshot the cycle started from
    pub devices: usize,
    /// Devices that answered and were written back
    pub refreshed: usize,
    /// Devices that did not answer or could not be written back
    pub failed: usize,
    /// Devices removed for being unseen past the purge timeout
    pub purged: usize,
    /// Devices left after the purge
    pub remaining: usize,
    /// Calls counted since the previous cycle
    pub activity: CallCounts,
}

/// Self-rescheduling refresh/purge loop over the device directory
pub struct ReconciliationLoop {
    store: DeviceStore,
    devices: Arc<dyn DeviceStatus>,
    stats: Arc<CallStatistics>,
    heartbeat: Arc<dyn Heartbeat>,
    interval: Duration,
    purge_timeout: Duration,
    baseline: CallCounts,
}

impl ReconciliationLoop {
    /// Create a loop using the configured interval and purge timeout
    #[must_use]
    pub fn new(
        store: DeviceStore,
        devices: Arc<dyn DeviceStatus>,
        stats: Arc<CallStatistics>,
        heartbeat: Arc<dyn Heartbeat>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            devices,
            stats,
            heartbeat,
            interval: config.refresh_interval,
            purge_timeout: config.purge_timeout,
            baseline: CallCounts::default(),
        }
    }

    /// Run cycles until `shutdown` flips to true (or its sender goes away)
    ///
    /// Shutdown is only observed while waiting between cycles; a cycle that
    /// has started always runs to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            purge_timeout_secs = self.purge_timeout.as_secs(),
            "reconciliation loop started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }

            self.heartbeat.wake();

            if let Err(e) = self.run_cycle(Utc::now().trunc_subsecs(3)).await {
                tracing::error!(error = %e, "reconciliation cycle failed");
            }
        }

        tracing::info!("reconciliation loop stopped");
    }

    /// Run a single cycle as of `now`
    ///
    /// Per-device failures are logged and counted in the report; they never
    /// abort the cycle.
    ///
    /// # Errors
    ///
    /// Returns error if the directory snapshot cannot be read
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        tracing::info!("updating device directory");

        let snapshot = self.store.get_all()?;
        let mut report = CycleReport {
            devices: snapshot.len(),
            ..CycleReport::default()
        };

        let refreshes = snapshot.iter().map(|record| self.refresh(record, now));
        let results = futures::future::join_all(refreshes).await;

        for refreshed in results {
            let Some(record) = refreshed else {
                report.failed += 1;
                continue;
            };
            match self.store.upsert(&record) {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    tracing::warn!(name = %record.name, error = %e, "failed to store refreshed device");
                    report.failed += 1;
                }
            }
        }

        match self.store.purge_expired(now, self.purge_timeout) {
            Ok(purged) => report.purged = purged,
            Err(e) => tracing::error!(error = %e, "failed to purge expired devices"),
        }

        match self.store.count() {
            Ok(remaining) => report.remaining = remaining,
            Err(e) => tracing::warn!(error = %e, "failed to count devices"),
        }

        tracing::info!(
            entries = report.remaining,
            refreshed = report.refreshed,
            failed = report.failed,
            purged = report.purged,
            "device directory updated"
        );

        report.activity = self.report_activity();
        Ok(report)
    }

    /// Fetch live state for one device; `None` leaves it untouched this cycle
    async fn refresh(&self, record: &DeviceRecord, now: DateTime<Utc>) -> Option<DeviceRecord> {
        self.stats.increment(Call::RefreshDevice);

        match self.devices.fetch_state(record).await {
            Ok(state) => Some(state.apply(record, now)),
            Err(e) => {
                // Not seen this time; it ages toward the purge timeout
                tracing::debug!(name = %record.name, error = %e, "device refresh failed");
                None
            }
        }
    }

    fn report_activity(&mut self) -> CallCounts {
        let current = self.stats.snapshot();
        let delta = CallCounts::delta(&self.baseline, &current);

        tracing::info!(total = %current, "total activity");
        tracing::info!(since_last = %delta, "activity since last cycle");

        self.baseline = current;
        delta
    }
}
