//! Discovery event handlers
//!
//! Translate discovered/updated/removed notifications into directory
//! mutations. Each handler works on a detached copy of a record and writes it
//! back through [`DeviceStore::upsert`].

use std::sync::Arc;

use super::ServiceEntry;
use crate::Result;
use crate::config::DiscoveryConfig;
use crate::db::{DeviceRecord, DeviceStore};
use crate::devices::DeviceStatus;
use crate::stats::{Call, CallStatistics};

/// A discovery notification
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    Discovered(ServiceEntry),
    Updated(ServiceEntry),
    Removed(ServiceEntry),
}

/// Applies discovery notifications to the device directory
pub struct DirectoryEvents {
    store: DeviceStore,
    devices: Arc<dyn DeviceStatus>,
    stats: Arc<CallStatistics>,
    naming: DiscoveryConfig,
}

impl DirectoryEvents {
    /// Create handlers writing into `store`
    #[must_use]
    pub fn new(
        store: DeviceStore,
        devices: Arc<dyn DeviceStatus>,
        stats: Arc<CallStatistics>,
        naming: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            devices,
            stats,
            naming,
        }
    }

    /// Apply one event, logging instead of propagating failures
    ///
    /// A bad entry only affects itself; the caller keeps processing events.
    pub async fn handle(&self, event: DirectoryEvent) {
        let (kind, result) = match &event {
            DirectoryEvent::Discovered(entry) => ("discovered", self.on_discovered(entry).await),
            DirectoryEvent::Updated(entry) => ("updated", self.on_updated(entry).await),
            DirectoryEvent::Removed(entry) => ("removed", self.on_removed(entry)),
        };

        if let Err(e) = result {
            tracing::warn!(event = kind, error = %e, "failed to apply discovery event");
        }
    }

    /// A device appeared: fetch its state and add it
    ///
    /// A device that does not answer is still added, marked offline. If it
    /// was already tracked, its last known state is kept.
    ///
    /// # Errors
    ///
    /// Returns error if the entry is malformed or the store fails
    pub async fn on_discovered(&self, entry: &ServiceEntry) -> Result<()> {
        self.stats.increment(Call::HostDiscovered);

        let name = self.device_name(entry)?;
        let candidate = DeviceRecord::new(name, entry.device_url(), entry.last_seen_alive);
        tracing::info!(name = %candidate.name, url = %candidate.url, "host discovered");

        let record = self.fetch_status(candidate).await;

        self.stats.increment(Call::UpdateDb);
        self.store.upsert(&record)?;
        Ok(())
    }

    /// A known device re-announced itself: refresh its liveness
    ///
    /// An update for a device that is not in the directory is handled as a
    /// fresh discovery.
    ///
    /// # Errors
    ///
    /// Returns error if the entry is malformed or the store fails
    pub async fn on_updated(&self, entry: &ServiceEntry) -> Result<()> {
        self.stats.increment(Call::HostUpdated);

        let name = self.device_name(entry)?;
        let Some(mut record) = self.store.get_by_name(&name)? else {
            tracing::debug!(%name, "update for untracked host, treating as discovery");
            return self.on_discovered(entry).await;
        };

        record.last_seen = entry.last_seen_alive;
        record.online = true;
        record.url = entry.device_url();

        self.store.upsert(&record)?;
        tracing::debug!(%name, last_seen = %record.last_seen, "host updated");
        Ok(())
    }

    /// A device left the network: drop it
    ///
    /// # Errors
    ///
    /// Returns error if the entry is malformed or the store fails
    pub fn on_removed(&self, entry: &ServiceEntry) -> Result<()> {
        self.stats.increment(Call::HostRemoved);

        let name = self.device_name(entry)?;
        let removed = self.store.remove_by_name(&name)?;
        tracing::info!(%name, removed, "host removed");
        Ok(())
    }

    async fn fetch_status(&self, mut record: DeviceRecord) -> DeviceRecord {
        self.stats.increment(Call::GetDeviceStatus);

        match self.devices.fetch_state(&record).await {
            Ok(state) => state.apply(&record, record.last_seen),
            Err(e) => {
                tracing::warn!(name = %record.name, error = %e, "device did not answer, adding as offline");
                self.keep_known_state(&mut record);
                record.online = false;
                record
            }
        }
    }

    /// Carry the last known state of an already tracked device into `record`
    fn keep_known_state(&self, record: &mut DeviceRecord) {
        match self.store.get_by_name(&record.name) {
            Ok(Some(known)) => {
                record.on = known.on;
                record.red = known.red;
                record.green = known.green;
                record.blue = known.blue;
                record.node_type = known.node_type;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(name = %record.name, error = %e, "failed to read known device state"),
        }
    }

    fn device_name(&self, entry: &ServiceEntry) -> Result<String> {
        entry.device_name(&self.naming.host_prefix, &self.naming.service_marker)
    }
}
