//! hippoled - directory daemon for networked LED lamps
//!
//! Keeps an authoritative, persistent directory of the lamps found on the
//! local network and keeps it in step with their live state:
//! - mDNS discovery events add, refresh and remove devices
//! - a reconciliation loop polls every device, purges stale ones and
//!   reports call statistics
//! - a read-only HTTP API exposes the directory
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ mDNS browser │   │ reconciliation loop│──▶│   watchdog   │
//! └──────┬───────┘   └─────────┬──────────┘   └──────────────┘
//!        │ events              │ refresh / purge
//! ┌──────▼─────────────────────▼──────────┐   ┌──────────────┐
//! │        DeviceStore (SQLite)           │◀──│  HTTP API    │
//! └───────────────────────────────────────┘   └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod reconcile;
pub mod stats;
pub mod watchdog;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, DeviceRecord, DeviceStore};
pub use devices::{DeviceState, DeviceStatus, HttpDeviceClient};
pub use discovery::{DirectoryEvent, DirectoryEvents, MdnsBrowser, ServiceEntry, Subnet};
pub use error::{Error, Result};
pub use reconcile::{CycleReport, ReconciliationLoop};
pub use stats::{Call, CallCounts, CallStatistics};
pub use watchdog::{Heartbeat, Watchdog};
