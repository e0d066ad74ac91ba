//! Daemon - the directory service
//!
//! Wires the device store, discovery, reconciliation, watchdog and API
//! together and runs them until interrupted.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{ApiServer, ApiState};
use crate::db::{self, DeviceStore};
use crate::devices::{DeviceStatus, HttpDeviceClient};
use crate::discovery::{DirectoryEvents, MdnsBrowser};
use crate::reconcile::ReconciliationLoop;
use crate::stats::CallStatistics;
use crate::watchdog::{Heartbeat, Watchdog};
use crate::{Config, Error, Result};

/// The hippoled daemon - keeps the device directory in sync
pub struct Daemon {
    config: Config,
    store: DeviceStore,
    stats: Arc<CallStatistics>,
}

impl Daemon {
    /// Create a new daemon instance, opening the device database
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is inconsistent or the database
    /// cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        if config.watchdog_timeout <= config.refresh_interval {
            return Err(Error::Config(format!(
                "watchdog timeout ({}s) must exceed refresh interval ({}s)",
                config.watchdog_timeout.as_secs(),
                config.refresh_interval.as_secs()
            )));
        }

        let db_path = config.database_path();
        let pool = db::init(&db_path)?;
        tracing::info!(path = %db_path.display(), "device database opened");

        Ok(Self {
            config,
            store: DeviceStore::new(pool),
            stats: Arc::new(CallStatistics::new()),
        })
    }

    /// The device directory
    #[must_use]
    pub const fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails or the reconciliation watchdog expires
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            port = self.config.port,
            "daemon running"
        );

        let devices: Arc<dyn DeviceStatus> =
            Arc::new(HttpDeviceClient::new(self.config.device_timeout)?);
        let watchdog = Arc::new(Watchdog::new(self.config.watchdog_timeout));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Read-only API
        let mut api_handle = ApiServer::new(
            ApiState {
                store: self.store.clone(),
                stats: Arc::clone(&self.stats),
            },
            self.config.port,
        )
        .spawn();

        // Discovery is best effort; the directory still serves and refreshes without it
        let events = Arc::new(DirectoryEvents::new(
            self.store.clone(),
            Arc::clone(&devices),
            Arc::clone(&self.stats),
            self.config.discovery.clone(),
        ));
        match MdnsBrowser::new(self.config.discovery.clone()) {
            Ok(browser) => {
                let rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) = browser.run(events, rx).await {
                        tracing::error!(error = %e, "mDNS discovery failed");
                    }
                });
            }
            Err(e) => tracing::error!(error = %e, "mDNS discovery unavailable"),
        }

        let heartbeat: Arc<dyn Heartbeat> = watchdog.clone();
        let reconcile = ReconciliationLoop::new(
            self.store.clone(),
            devices,
            Arc::clone(&self.stats),
            heartbeat,
            &self.config,
        );
        let reconcile_handle = tokio::spawn(reconcile.run(shutdown_rx));

        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                }
                tracing::info!("shutdown requested");
                Ok(())
            }
            () = watchdog.expired() => Err(Error::Watchdog(format!(
                "no reconciliation cycle for {}s",
                watchdog.since_last_wake().as_secs()
            ))),
            api = &mut api_handle => match api {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(Error::Api(format!("API server task failed: {e}"))),
            },
        };

        if outcome.is_ok() {
            let _ = shutdown_tx.send(true);
            if let Err(e) = reconcile_handle.await {
                tracing::warn!(error = %e, "reconciliation task ended abnormally");
            }
        }
        api_handle.abort();

        tracing::info!("daemon stopped");
        outcome
    }
}
