//! Configuration management for the hippoled daemon
//!
//! Values resolve with priority env > TOML file > default. The resulting
//! [`Config`] is immutable and handed to each component's constructor.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::discovery::Subnet;
use crate::Result;

/// Default seconds between reconciliation cycles
pub const DEFAULT_REFRESH_SECS: u64 = 60;

/// Default minutes a device may go unseen before it is purged
pub const DEFAULT_PURGE_MINUTES: u64 = 5;

/// Default minutes without a heartbeat before the watchdog fires
pub const DEFAULT_WATCHDOG_MINUTES: u64 = 5;

/// Default device status request timeout
pub const DEFAULT_DEVICE_TIMEOUT_SECS: u64 = 10;

/// Default read-only API port
pub const DEFAULT_PORT: u16 = 9000;

/// Default network devices must be on
pub const DEFAULT_LOCAL_NETWORK: &str = "192.168.0.0/16";

/// hippoled daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (device database)
    pub data_dir: PathBuf,

    /// Read-only API listen port
    pub port: u16,

    /// Wait between the end of one reconciliation cycle and the start of the next
    pub refresh_interval: Duration,

    /// Maximum age of a device's last contact before it is purged
    pub purge_timeout: Duration,

    /// Maximum gap between reconciliation heartbeats
    pub watchdog_timeout: Duration,

    /// Per-request timeout used by the device status client
    pub device_timeout: Duration,

    /// Service discovery configuration
    pub discovery: DiscoveryConfig,
}

/// Service discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// DNS-SD service type to browse
    pub service_type: String,

    /// Instance name prefix stripped to obtain the device name
    pub host_prefix: String,

    /// Marker that terminates the device name inside the service name
    pub service_marker: String,

    /// Only addresses inside this network are accepted
    pub local_network: Subnet,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "_hippohttp._tcp.local.".to_string(),
            host_prefix: "HippoLed-".to_string(),
            service_marker: "._hippohttp".to_string(),
            local_network: Subnet::v4([192, 168, 0, 0], 16),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            port: DEFAULT_PORT,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            purge_timeout: Duration::from_secs(DEFAULT_PURGE_MINUTES * 60),
            watchdog_timeout: Duration::from_secs(DEFAULT_WATCHDOG_MINUTES * 60),
            device_timeout: Duration::from_secs(DEFAULT_DEVICE_TIMEOUT_SECS),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the optional config file
    ///
    /// # Errors
    ///
    /// Returns error if the configured local network is not a valid IPv4 CIDR
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from an already parsed config file, applying env overrides
    ///
    /// # Errors
    ///
    /// Returns error if the configured local network is not a valid IPv4 CIDR
    pub fn from_file(fc: file::DaemonConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let discovery_defaults = DiscoveryConfig::default();

        let data_dir = std::env::var("HIPPOLED_DATA_DIR")
            .ok()
            .or(fc.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);

        let port = env_parse("HIPPOLED_PORT").or(fc.port).unwrap_or(defaults.port);

        let refresh_interval = env_parse("HIPPOLED_REFRESH_SECS")
            .or(fc.directory.refresh_interval_secs)
            .map_or(defaults.refresh_interval, Duration::from_secs);

        let purge_timeout = env_parse::<u64>("HIPPOLED_PURGE_MINUTES")
            .or(fc.directory.purge_timeout_minutes)
            .map_or(defaults.purge_timeout, |m| Duration::from_secs(m * 60));

        let watchdog_timeout = env_parse::<u64>("HIPPOLED_WATCHDOG_MINUTES")
            .or(fc.directory.watchdog_timeout_minutes)
            .map_or(defaults.watchdog_timeout, |m| Duration::from_secs(m * 60));

        let device_timeout = env_parse("HIPPOLED_DEVICE_TIMEOUT_SECS")
            .or(fc.directory.device_timeout_secs)
            .map_or(defaults.device_timeout, Duration::from_secs);

        let local_network = match std::env::var("HIPPOLED_LOCAL_NETWORK")
            .ok()
            .or(fc.discovery.local_network)
        {
            Some(cidr) => cidr.parse()?,
            None => discovery_defaults.local_network,
        };

        let discovery = DiscoveryConfig {
            service_type: fc
                .discovery
                .service_type
                .unwrap_or(discovery_defaults.service_type),
            host_prefix: fc
                .discovery
                .host_prefix
                .unwrap_or(discovery_defaults.host_prefix),
            service_marker: fc
                .discovery
                .service_marker
                .unwrap_or(discovery_defaults.service_marker),
            local_network,
        };

        Ok(Self {
            data_dir,
            port,
            refresh_interval,
            purge_timeout,
            watchdog_timeout,
            device_timeout,
            discovery,
        })
    }

    /// Path of the device database
    ///
    /// The file name carries the crate's major.minor version so a schema
    /// change in a new release never reuses an incompatible file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(database_file_name())
    }
}

/// Versioned database file name, e.g. `hippoled0.3.db`
#[must_use]
pub fn database_file_name() -> String {
    format!(
        "hippoled{}.{}.db",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

/// Data directory (~/.local/share/hippoled on Linux)
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("hippoled"))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
