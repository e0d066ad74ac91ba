//! Call statistics
//!
//! Named activity counters shared by every component. Counters only ever
//! grow; reporting takes a [`CallCounts`] snapshot and diffs it against the
//! previous one instead of resetting live values.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A logical operation whose calls are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// Single device read through the API
    DeviceGet,
    /// Device state change requested through the API; reserved for a
    /// write endpoint, the read-only API never counts it
    DeviceSet,
    /// Directory listing read through the API
    DevicesGetAll,
    HostDiscovered,
    HostUpdated,
    HostRemoved,
    /// API request received
    RequestScheduled,
    /// API request answered
    RequestServed,
    /// Discovery result written to the directory
    UpdateDb,
    /// Live state fetched for a newly discovered device
    GetDeviceStatus,
    /// Device refreshed by a reconciliation cycle
    RefreshDevice,
}

impl Call {
    /// Every counted operation, in reporting order
    pub const ALL: [Self; 11] = [
        Self::DeviceGet,
        Self::DeviceSet,
        Self::DevicesGetAll,
        Self::HostDiscovered,
        Self::HostUpdated,
        Self::HostRemoved,
        Self::RequestScheduled,
        Self::RequestServed,
        Self::UpdateDb,
        Self::GetDeviceStatus,
        Self::RefreshDevice,
    ];

    /// Stable counter name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DeviceGet => "DeviceGet",
            Self::DeviceSet => "DeviceSet",
            Self::DevicesGetAll => "DevicesGetAll",
            Self::HostDiscovered => "HostDiscovered",
            Self::HostUpdated => "HostUpdated",
            Self::HostRemoved => "HostRemoved",
            Self::RequestScheduled => "RequestScheduled",
            Self::RequestServed => "RequestServed",
            Self::UpdateDb => "UpdateDb",
            Self::GetDeviceStatus => "GetDeviceStatus",
            Self::RefreshDevice => "RefreshDevice",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Call {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|call| call.name() == s)
            .ok_or_else(|| format!("unknown call counter '{s}'"))
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    counts: [u64; Call::ALL.len()],
}

impl CallCounts {
    /// Value of one counter
    #[must_use]
    pub const fn get(&self, call: Call) -> u64 {
        self.counts[call.index()]
    }

    /// Per-counter sum
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut counts = self.counts;
        for (c, o) in counts.iter_mut().zip(other.counts) {
            *c = c.saturating_add(o);
        }
        Self { counts }
    }

    /// Per-counter difference, floored at zero
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        let mut counts = self.counts;
        for (c, o) in counts.iter_mut().zip(other.counts) {
            *c = c.saturating_sub(o);
        }
        Self { counts }
    }

    /// Activity between an earlier and a later snapshot
    #[must_use]
    pub fn delta(earlier: &Self, later: &Self) -> Self {
        later.subtract(earlier)
    }

    /// Sum of all counters
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Iterate `(call, count)` pairs in reporting order
    pub fn iter(&self) -> impl Iterator<Item = (Call, u64)> + '_ {
        Call::ALL.into_iter().map(|call| (call, self.get(call)))
    }
}

impl fmt::Display for CallCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (call, count)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{call}: {count}")?;
        }
        Ok(())
    }
}

impl Serialize for CallCounts {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(Call::ALL.len()))?;
        for (call, count) in self.iter() {
            map.serialize_entry(call.name(), &count)?;
        }
        map.end()
    }
}

/// Thread-safe call counters
#[derive(Debug, Default)]
pub struct CallStatistics {
    counters: [AtomicU64; Call::ALL.len()],
}

impl CallStatistics {
    /// Create a new set of zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call
    pub fn increment(&self, call: Call) {
        self.counters[call.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Count one call by counter name
    ///
    /// An unknown name is an instrumentation bug; it is logged and ignored so
    /// it never fails the caller.
    pub fn increment_named(&self, name: &str) {
        match name.parse::<Call>() {
            Ok(call) => self.increment(call),
            Err(e) => tracing::error!(error = %e, "invalid call counter ignored"),
        }
    }

    /// Copy of the current counter values
    #[must_use]
    pub fn snapshot(&self) -> CallCounts {
        let mut counts = [0; Call::ALL.len()];
        for (slot, counter) in counts.iter_mut().zip(&self.counters) {
            *slot = counter.load(Ordering::Relaxed);
        }
        CallCounts { counts }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn call_index_matches_all_order() {
        for (i, call) in Call::ALL.into_iter().enumerate() {
            assert_eq!(call.index(), i);
        }
    }

    #[test]
    fn names_round_trip() {
        for call in Call::ALL {
            assert_eq!(call.name().parse::<Call>().unwrap(), call);
        }
        assert!("LampGet".parse::<Call>().is_err());
    }

    #[test]
    fn delta_reports_only_new_activity() {
        let stats = CallStatistics::new();
        for _ in 0..3 {
            stats.increment(Call::HostDiscovered);
        }
        stats.increment(Call::RefreshDevice);
        let first = stats.snapshot();

        for _ in 0..5 {
            stats.increment(Call::HostDiscovered);
        }
        stats.increment(Call::HostRemoved);
        let second = stats.snapshot();

        let delta = CallCounts::delta(&first, &second);
        assert_eq!(delta.get(Call::HostDiscovered), 5);
        assert_eq!(delta.get(Call::HostRemoved), 1);
        assert_eq!(delta.get(Call::RefreshDevice), 0);
        assert_eq!(delta.get(Call::DeviceGet), 0);
        assert_eq!(delta.total(), 6);
        assert_eq!(first.add(&delta), second);
    }

    #[test]
    fn unknown_name_is_ignored() {
        let stats = CallStatistics::new();
        stats.increment_named("NoSuchCounter");
        stats.increment_named("HostUpdated");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total(), 1);
        assert_eq!(snapshot.get(Call::HostUpdated), 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(CallStatistics::new());

        std::thread::scope(|s| {
            for _ in 0..8 {
                let stats = Arc::clone(&stats);
                s.spawn(move || {
                    for _ in 0..1000 {
                        stats.increment(Call::UpdateDb);
                    }
                });
            }
        });

        assert_eq!(stats.snapshot().get(Call::UpdateDb), 8000);
    }

    #[test]
    fn display_lists_every_counter() {
        let stats = CallStatistics::new();
        stats.increment(Call::DeviceGet);
        let text = stats.snapshot().to_string();

        assert!(text.starts_with("DeviceGet: 1, DeviceSet: 0"));
        assert!(text.ends_with("RefreshDevice: 0"));
        assert_eq!(text.split(", ").count(), Call::ALL.len());
    }

    #[test]
    fn serializes_as_named_map() {
        let stats = CallStatistics::new();
        stats.increment(Call::HostRemoved);
        let json = serde_json::to_value(stats.snapshot()).unwrap();

        assert_eq!(json["HostRemoved"], 1);
        assert_eq!(json["UpdateDb"], 0);
    }
}
