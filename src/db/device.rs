//! Device directory store
//!
//! Holds one [`DeviceRecord`] per case-insensitive device name. Every
//! operation runs under a single store-wide lock, so compound sequences such
//! as the insert-then-update fallback in [`DeviceStore::upsert`] are atomic
//! with respect to each other and to purges.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::{DbConn, DbPool};
use crate::{Error, Result};

/// A known device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Unique name, compared ignoring case
    pub name: String,
    /// Address the device is reached at, e.g. `http://10.0.0.5:9000`
    pub url: String,
    /// Last known power state
    pub on: bool,
    /// Last known reachability
    pub online: bool,
    /// Last successful contact or discovery event
    pub last_seen: DateTime<Utc>,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Device class reported by the firmware
    pub node_type: String,
}

impl DeviceRecord {
    /// Create a record for a freshly seen device with unknown state
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            on: false,
            online: false,
            last_seen,
            red: 0,
            green: 0,
            blue: 0,
            node_type: String::new(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            url: row.get(1)?,
            on: row.get(2)?,
            online: row.get(3)?,
            last_seen: DateTime::from_timestamp_millis(row.get(4)?).unwrap_or_default(),
            red: row.get(5)?,
            green: row.get(6)?,
            blue: row.get(7)?,
            node_type: row.get(8)?,
        })
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record with that name existed
    Inserted,
    /// An existing record was updated in place
    Updated,
}

const SELECT_COLUMNS: &str =
    "SELECT name, url, is_on, online, last_seen, red, green, blue, node_type FROM devices";

/// Concurrency-safe device directory backed by `SQLite`
#[derive(Clone)]
pub struct DeviceStore {
    pool: DbPool,
    lock: Arc<Mutex<()>>,
}

impl DeviceStore {
    /// Create a new device store
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Insert the record, or update the existing record with the same name
    ///
    /// The insert is attempted first and the update only runs when the unique
    /// name index rejects it, so concurrent callers never race on a separate
    /// existence check. The stored name keeps the casing it was created with.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails for any reason other than a
    /// duplicate name
    pub fn upsert(&self, record: &DeviceRecord) -> Result<UpsertOutcome> {
        let _guard = self.lock()?;
        let conn = self.conn()?;

        match insert(&conn, record) {
            Ok(()) => Ok(UpsertOutcome::Inserted),
            Err(e) if is_duplicate_key(&e) => {
                update(&conn, record)?;
                Ok(UpsertOutcome::Updated)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of all devices
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_all(&self) -> Result<Vec<DeviceRecord>> {
        let _guard = self.lock()?;
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY name COLLATE NOCASE"))?;
        let devices = stmt
            .query_map([], DeviceRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(devices)
    }

    /// Find a device by name, ignoring case
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_by_name(&self, name: &str) -> Result<Option<DeviceRecord>> {
        let _guard = self.lock()?;
        let conn = self.conn()?;

        let device = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE name = ?1 COLLATE NOCASE"),
                [name],
                DeviceRecord::from_row,
            )
            .optional()?;

        Ok(device)
    }

    /// Delete the device with this name, ignoring case
    ///
    /// Returns the number of removed records; zero is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn remove_by_name(&self, name: &str) -> Result<usize> {
        let _guard = self.lock()?;
        let conn = self.conn()?;

        let removed = conn.execute("DELETE FROM devices WHERE name = ?1 COLLATE NOCASE", [name])?;
        Ok(removed)
    }

    /// Delete every device last seen strictly before `now - timeout`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn purge_expired(&self, now: DateTime<Utc>, timeout: Duration) -> Result<usize> {
        let Some(cutoff) = TimeDelta::from_std(timeout)
            .ok()
            .and_then(|t| now.checked_sub_signed(t))
        else {
            return Ok(0);
        };

        let _guard = self.lock()?;
        let conn = self.conn()?;

        let purged = conn.execute(
            "DELETE FROM devices WHERE last_seen < ?1",
            [cutoff.timestamp_millis()],
        )?;

        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "purged expired devices");
        }
        Ok(purged)
    }

    /// Number of devices in the directory
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<usize> {
        let _guard = self.lock()?;
        let conn = self.conn()?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| Error::Database("device store lock poisoned".to_string()))
    }

    fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }
}

fn insert(conn: &Connection, record: &DeviceRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO devices (name, url, is_on, online, last_seen, red, green, blue, node_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.name,
            record.url,
            record.on,
            record.online,
            record.last_seen.timestamp_millis(),
            record.red,
            record.green,
            record.blue,
            record.node_type,
        ],
    )?;
    Ok(())
}

/// `last_seen` never moves backwards
fn update(conn: &Connection, record: &DeviceRecord) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE devices
         SET url = ?2, is_on = ?3, online = ?4, last_seen = MAX(last_seen, ?5),
             red = ?6, green = ?7, blue = ?8, node_type = ?9
         WHERE name = ?1 COLLATE NOCASE",
        params![
            record.name,
            record.url,
            record.on,
            record.online,
            record.last_seen.timestamp_millis(),
            record.red,
            record.green,
            record.blue,
            record.node_type,
        ],
    )?;
    Ok(())
}

fn is_duplicate_key(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn store() -> DeviceStore {
        DeviceStore::new(db::init_memory().unwrap())
    }

    fn lamp(name: &str, last_seen: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord::new(name, "http://10.0.0.5:9000", last_seen)
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let store = store();

        assert_eq!(store.upsert(&lamp("Lamp1", ts(0))).unwrap(), UpsertOutcome::Inserted);

        let mut changed = lamp("Lamp1", ts(10));
        changed.on = true;
        changed.red = 200;
        assert_eq!(store.upsert(&changed).unwrap(), UpsertOutcome::Updated);

        let all = store.get_all().unwrap();
        assert_eq!(all, vec![changed]);
    }

    #[test]
    fn names_are_unique_ignoring_case() {
        let store = store();
        store.upsert(&lamp("Kitchen", ts(0))).unwrap();
        store.upsert(&lamp("KITCHEN", ts(1))).unwrap();
        store.upsert(&lamp("kitchen", ts(2))).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        // Key identity keeps the original casing
        assert_eq!(all[0].name, "Kitchen");
        assert_eq!(all[0].last_seen, ts(2));
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = store();
        let mut record = lamp("Desk", ts(5));
        record.online = true;
        record.node_type = "rgb".to_string();

        store.upsert(&record).unwrap();
        store.upsert(&record).unwrap();

        assert_eq!(store.get_all().unwrap(), vec![record]);
    }

    #[test]
    fn last_seen_never_moves_backwards() {
        let store = store();
        store.upsert(&lamp("Porch", ts(100))).unwrap();

        let mut stale = lamp("Porch", ts(50));
        stale.on = true;
        store.upsert(&stale).unwrap();

        let stored = store.get_by_name("porch").unwrap().unwrap();
        assert_eq!(stored.last_seen, ts(100));
        assert!(stored.on);
    }

    #[test]
    fn get_by_name_ignores_case() {
        let store = store();
        store.upsert(&lamp("Lamp1", ts(0))).unwrap();

        assert!(store.get_by_name("lamp1").unwrap().is_some());
        assert!(store.get_by_name("LAMP1").unwrap().is_some());
        assert!(store.get_by_name("Lamp2").unwrap().is_none());
    }

    #[test]
    fn remove_by_name_ignores_case_and_absence() {
        let store = store();
        store.upsert(&lamp("Lamp1", ts(0))).unwrap();

        assert_eq!(store.remove_by_name("LAMP1").unwrap(), 1);
        assert_eq!(store.remove_by_name("Lamp1").unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn purge_removes_only_expired() {
        let store = store();
        let now = ts(10_000);
        store.upsert(&lamp("fresh", now - TimeDelta::minutes(1))).unwrap();
        store.upsert(&lamp("recent", now - TimeDelta::minutes(10))).unwrap();
        store.upsert(&lamp("ancient", now - TimeDelta::minutes(100))).unwrap();

        let purged = store
            .purge_expired(now, Duration::from_secs(50 * 60))
            .unwrap();
        assert_eq!(purged, 1);

        let names: Vec<_> = store.get_all().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["fresh", "recent"]);
    }

    #[test]
    fn purge_keeps_record_exactly_at_cutoff() {
        let store = store();
        let now = ts(600);
        store.upsert(&lamp("edge", ts(300))).unwrap();

        assert_eq!(store.purge_expired(now, Duration::from_secs(300)).unwrap(), 0);
        assert_eq!(store.purge_expired(now, Duration::from_secs(299)).unwrap(), 1);
    }

    #[test]
    fn concurrent_upserts_leave_one_record() {
        let store = store();

        std::thread::scope(|s| {
            for i in 0..16u8 {
                let store = store.clone();
                s.spawn(move || {
                    let mut record = lamp("Race", ts(0));
                    record.red = i;
                    store.upsert(&record).unwrap();
                });
            }
        });

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].red < 16);
    }

    #[test]
    fn duplicate_key_detection() {
        let pool = db::init_memory().unwrap();
        let conn = pool.get().unwrap();
        insert(&conn, &lamp("dup", ts(0))).unwrap();

        let err = insert(&conn, &lamp("DUP", ts(0))).unwrap_err();
        assert!(is_duplicate_key(&err));
        assert!(!is_duplicate_key(&rusqlite::Error::QueryReturnedNoRows));
    }
}
