//! Device status protocol
//!
//! The directory never talks to lamps itself; it goes through a
//! [`DeviceStatus`] implementation. [`http::HttpDeviceClient`] is the real
//! one, tests substitute fakes.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::Result;
use crate::db::DeviceRecord;

pub use http::HttpDeviceClient;

/// Live state reported by a device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub on: bool,
    #[serde(default)]
    pub red: u8,
    #[serde(default)]
    pub green: u8,
    #[serde(default)]
    pub blue: u8,
    #[serde(default)]
    pub node_type: String,
}

impl DeviceState {
    /// Detached copy of `record` carrying this state, marked online and seen at `now`
    #[must_use]
    pub fn apply(&self, record: &DeviceRecord, now: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord {
            name: record.name.clone(),
            url: record.url.clone(),
            on: self.on,
            online: true,
            last_seen: now.max(record.last_seen),
            red: self.red,
            green: self.green,
            blue: self.blue,
            node_type: self.node_type.clone(),
        }
    }
}

/// Fetches the current state of a device
#[async_trait]
pub trait DeviceStatus: Send + Sync {
    /// Query the device at `record.url`
    ///
    /// # Errors
    ///
    /// Returns error if the device is unreachable or answers with garbage
    async fn fetch_state(&self, record: &DeviceRecord) -> Result<DeviceState>;
}
