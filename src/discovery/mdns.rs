//! mDNS service browsing
//!
//! Browses for lamp services using mDNS (multicast DNS) and turns the
//! daemon's events into [`DirectoryEvent`]s:
//!
//! - first resolution of an instance: `Discovered`
//! - later resolutions of the same instance: `Updated`
//! - instance withdrawn: `Removed`
//!
//! Instances whose name lacks the service marker, or that have no address
//! inside the configured local network, are ignored.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::{mpsc, watch};

use super::{DirectoryEvent, DirectoryEvents, ServiceEntry};
use crate::config::DiscoveryConfig;
use crate::{Error, Result};

/// Buffered mDNS events between the blocking receiver and the async loop
const EVENT_BUFFER: usize = 64;

/// mDNS browser feeding the device directory
pub struct MdnsBrowser {
    /// mDNS daemon
    daemon: ServiceDaemon,

    tracker: ServiceTracker,
}

/// Turns raw daemon events into directory events
struct ServiceTracker {
    config: DiscoveryConfig,

    /// Full names of instances seen so far
    known: HashSet<String>,
}

impl MdnsBrowser {
    /// Create a new mDNS browser
    ///
    /// # Errors
    ///
    /// Returns error if mDNS daemon cannot be created
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Discovery(format!("failed to create mDNS daemon: {e}")))?;

        Ok(Self {
            daemon,
            tracker: ServiceTracker::new(config),
        })
    }

    /// Browse until `shutdown` flips to true, dispatching every event on its own task
    ///
    /// # Errors
    ///
    /// Returns error if browsing cannot be started
    pub async fn run(
        mut self,
        events: Arc<DirectoryEvents>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let service_type = self.tracker.config.service_type.clone();
        let receiver = self
            .daemon
            .browse(&service_type)
            .map_err(|e| Error::Discovery(format!("failed to browse: {e}")))?;

        tracing::info!(%service_type, network = %self.tracker.config.local_network, "mDNS browsing started");

        // The daemon's receiver blocks; pump it into a tokio channel. The pump
        // ends once the daemon shuts down and drops its sender.
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = receiver.recv() {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        tracing::warn!("mDNS event stream ended");
                        break;
                    };
                    if let Some(event) = self.tracker.translate(event) {
                        let events = Arc::clone(&events);
                        tokio::spawn(async move { events.handle(event).await });
                    }
                }
            }
        }

        if let Err(e) = self.daemon.stop_browse(&service_type) {
            tracing::trace!(error = %e, "failed to stop mDNS browse");
        }
        tracing::info!("mDNS browsing stopped");
        Ok(())
    }
}

impl ServiceTracker {
    fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            known: HashSet::new(),
        }
    }

    /// Map a raw daemon event to a directory event, tracking known instances
    fn translate(&mut self, event: ServiceEvent) -> Option<DirectoryEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let entry = self.entry_from_info(&info)?;
                if self.known.insert(entry.service.clone()) {
                    Some(DirectoryEvent::Discovered(entry))
                } else {
                    Some(DirectoryEvent::Updated(entry))
                }
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                if !self.known.remove(&fullname) {
                    return None;
                }
                Some(DirectoryEvent::Removed(ServiceEntry {
                    service: fullname,
                    host: String::new(),
                    addresses: Vec::new(),
                    port: 0,
                    last_seen_alive: Utc::now().trunc_subsecs(3),
                }))
            }
            other => {
                tracing::trace!(event = ?other, "mDNS event ignored");
                None
            }
        }
    }

    fn entry_from_info(&self, info: &ServiceInfo) -> Option<ServiceEntry> {
        let fullname = info.get_fullname();
        if !is_lamp_service(fullname, &self.config.service_marker) {
            tracing::trace!(%fullname, "not a lamp service");
            return None;
        }

        let mut addresses: Vec<IpAddr> = info
            .get_addresses()
            .iter()
            .copied()
            .filter(|addr| self.config.local_network.contains(*addr))
            .collect();
        if addresses.is_empty() {
            tracing::debug!(%fullname, "no address in local network, ignored");
            return None;
        }
        // The daemon hands addresses over unordered
        addresses.sort_unstable();

        Some(ServiceEntry {
            service: fullname.to_string(),
            host: info.get_hostname().to_string(),
            addresses,
            port: info.get_port(),
            last_seen_alive: Utc::now().trunc_subsecs(3),
        })
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::trace!(error = %e, "mDNS daemon shutdown error (expected on normal exit)");
        }
    }
}

/// Whether a service name carries the lamp service marker, ignoring case
fn is_lamp_service(fullname: &str, marker: &str) -> bool {
    let marker = marker.trim_start_matches(['.', '_']).to_ascii_lowercase();
    !marker.is_empty() && fullname.to_ascii_lowercase().contains(&marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_format() {
        let config = DiscoveryConfig::default();
        assert!(config.service_type.ends_with(".local."));
        assert!(config.service_type.starts_with('_'));
        assert!(config.service_type.contains("._tcp."));
    }

    #[test]
    fn lamp_service_filter() {
        assert!(is_lamp_service("HippoLed-Lamp1._hippohttp._tcp.local.", "._hippohttp"));
        assert!(is_lamp_service("hippoled-x._HIPPOHTTP._tcp.local.", "._hippohttp"));
        assert!(!is_lamp_service("Printer._ipp._tcp.local.", "._hippohttp"));
        assert!(!is_lamp_service("anything", "._"));
    }

    fn lamp_info(addresses: &str) -> ServiceInfo {
        ServiceInfo::new(
            "_hippohttp._tcp.local.",
            "HippoLed-Lamp1",
            "lamp1.local.",
            addresses,
            9000,
            None::<std::collections::HashMap<String, String>>,
        )
        .unwrap()
    }

    fn tracker() -> ServiceTracker {
        ServiceTracker::new(DiscoveryConfig::default())
    }

    #[test]
    fn resolutions_become_discovered_then_updated() {
        let mut tracker = tracker();

        let first = tracker.translate(ServiceEvent::ServiceResolved(lamp_info("192.168.1.5")));
        let Some(DirectoryEvent::Discovered(entry)) = first else {
            panic!("expected discovery");
        };
        assert_eq!(entry.service, "HippoLed-Lamp1._hippohttp._tcp.local.");
        assert_eq!(entry.device_url(), "http://192.168.1.5:9000");

        let second = tracker.translate(ServiceEvent::ServiceResolved(lamp_info("192.168.1.5")));
        assert!(matches!(second, Some(DirectoryEvent::Updated(_))));
    }

    #[test]
    fn resolution_outside_local_network_is_ignored() {
        let mut tracker = tracker();

        let foreign = tracker.translate(ServiceEvent::ServiceResolved(lamp_info("10.0.0.5")));
        assert!(foreign.is_none());
        assert!(tracker.known.is_empty());
    }

    #[test]
    fn removal_of_resolved_instance_is_reported_once() {
        let mut tracker = tracker();
        let fullname = "HippoLed-Lamp1._hippohttp._tcp.local.".to_string();
        tracker.translate(ServiceEvent::ServiceResolved(lamp_info("192.168.1.5")));

        let removed = tracker.translate(ServiceEvent::ServiceRemoved(
            "_hippohttp._tcp.local.".to_string(),
            fullname.clone(),
        ));
        let Some(DirectoryEvent::Removed(entry)) = removed else {
            panic!("expected removal");
        };
        assert_eq!(entry.service, fullname);

        let again = tracker.translate(ServiceEvent::ServiceRemoved(
            "_hippohttp._tcp.local.".to_string(),
            fullname,
        ));
        assert!(again.is_none());
    }

    #[test]
    fn removal_of_unknown_instance_is_ignored() {
        let mut tracker = tracker();
        let removed = tracker.translate(ServiceEvent::ServiceRemoved(
            "_hippohttp._tcp.local.".to_string(),
            "HippoLed-Lamp1._hippohttp._tcp.local.".to_string(),
        ));
        assert!(removed.is_none());
    }

    #[test]
    fn multiple_local_addresses_pick_the_lowest() {
        let mut tracker = tracker();

        let event = tracker.translate(ServiceEvent::ServiceResolved(lamp_info(
            "192.168.1.9,10.0.0.5,192.168.1.5",
        )));
        let Some(DirectoryEvent::Discovered(entry)) = event else {
            panic!("expected discovery");
        };
        assert_eq!(entry.addresses.len(), 2);
        assert_eq!(entry.device_url(), "http://192.168.1.5:9000");
    }

    #[test]
    fn foreign_service_type_is_ignored() {
        let mut tracker = tracker();
        let printer = ServiceInfo::new(
            "_ipp._tcp.local.",
            "Printer",
            "printer.local.",
            "192.168.1.7",
            631,
            None::<std::collections::HashMap<String, String>>,
        )
        .unwrap();

        assert!(tracker.translate(ServiceEvent::ServiceResolved(printer)).is_none());
    }

    #[tokio::test]
    async fn test_browser_creation() {
        // Actual mDNS sockets may be unavailable in CI environments
        if let Ok(browser) = MdnsBrowser::new(DiscoveryConfig::default()) {
            assert!(browser.tracker.known.is_empty());
        }
    }
}
