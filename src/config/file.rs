//! TOML configuration file loading
//!
//! Supports `~/.config/hippoled/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfigFile {
    /// Directory holding the device database
    pub data_dir: Option<String>,

    /// Read-only API port
    pub port: Option<u16>,

    /// Directory synchronization settings
    #[serde(default)]
    pub directory: DirectoryFileConfig,

    /// Service discovery settings
    #[serde(default)]
    pub discovery: DiscoveryFileConfig,
}

/// Reconciliation and expiry settings
#[derive(Debug, Default, Deserialize)]
pub struct DirectoryFileConfig {
    /// Seconds between reconciliation cycles
    pub refresh_interval_secs: Option<u64>,

    /// Minutes without contact before a device is purged
    pub purge_timeout_minutes: Option<u64>,

    /// Minutes without a reconciliation heartbeat before the process gives up
    pub watchdog_timeout_minutes: Option<u64>,

    /// Per-request timeout for device status calls
    pub device_timeout_secs: Option<u64>,
}

/// mDNS discovery settings
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryFileConfig {
    /// IPv4 network in CIDR notation that devices must live in
    pub local_network: Option<String>,

    /// DNS-SD service type to browse
    pub service_type: Option<String>,

    /// Instance name prefix stripped to obtain the device name
    pub host_prefix: Option<String>,

    /// Service marker that terminates the device name
    pub service_marker: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `DaemonConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> DaemonConfigFile {
    let Some(path) = config_file_path() else {
        return DaemonConfigFile::default();
    };

    if !path.exists() {
        return DaemonConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            DaemonConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            DaemonConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config(content: &str) -> crate::Result<DaemonConfigFile> {
    let config = toml::from_str(content)?;
    tracing::info!("loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/hippoled/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hippoled").join("config.toml"))
}
