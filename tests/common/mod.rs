//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hippoled::{DeviceRecord, DeviceState, DeviceStatus, DeviceStore, Error, Result, ServiceEntry, db};

/// Set up a device store over an in-memory test database
#[must_use]
pub fn setup_test_store() -> DeviceStore {
    DeviceStore::new(db::init_memory().expect("failed to init test db"))
}

/// Fixed instant `secs` seconds after a reference time
#[must_use]
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
}

/// Discovery entry for a lamp called `name`
#[must_use]
pub fn lamp_entry(name: &str, addr: &str, port: u16, seen: DateTime<Utc>) -> ServiceEntry {
    ServiceEntry {
        service: format!("HippoLed-{name}._hippohttp._tcp.local."),
        host: format!("{name}.local."),
        addresses: vec![addr.parse().expect("valid address")],
        port,
        last_seen_alive: seen,
    }
}

/// Device protocol fake: every device answers unless taken down
#[derive(Default)]
pub struct FakeDevices {
    down: Mutex<HashSet<String>>,
}

impl FakeDevices {
    pub fn take_down(&self, name: &str) {
        self.down.lock().unwrap().insert(name.to_lowercase());
    }

    pub fn bring_up(&self, name: &str) {
        self.down.lock().unwrap().remove(&name.to_lowercase());
    }
}

#[async_trait]
impl DeviceStatus for FakeDevices {
    async fn fetch_state(&self, record: &DeviceRecord) -> Result<DeviceState> {
        if self.down.lock().unwrap().contains(&record.name.to_lowercase()) {
            return Err(Error::Device(format!("{} unreachable", record.name)));
        }
        Ok(DeviceState {
            on: true,
            red: 255,
            green: 160,
            blue: 40,
            node_type: "bulb".to_string(),
        })
    }
}
