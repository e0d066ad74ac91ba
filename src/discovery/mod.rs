//! Service discovery using mDNS/DNS-SD
//!
//! Lamps announce themselves as `HippoLed-<name>._hippohttp._tcp.local.`.
//! [`mdns::MdnsBrowser`] turns those announcements into [`ServiceEntry`]
//! values and hands them to [`events::DirectoryEvents`], which keeps the
//! device directory in step.

pub mod events;
pub mod mdns;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::{Error, Result};

pub use events::{DirectoryEvent, DirectoryEvents};
pub use mdns::MdnsBrowser;

/// A service instance seen on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Full service instance name, e.g. `HippoLed-Lamp1._hippohttp._tcp.local.`
    pub service: String,
    /// Host name the instance advertised
    pub host: String,
    /// Addresses the instance resolved to, preferred first
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    /// When the instance last proved to be alive
    pub last_seen_alive: DateTime<Utc>,
}

impl ServiceEntry {
    /// Device name: the text between `prefix` and `marker` in the service name
    ///
    /// # Errors
    ///
    /// Returns error if the service name does not have that shape
    pub fn device_name(&self, prefix: &str, marker: &str) -> Result<String> {
        let malformed = || Error::Discovery(format!("unexpected service name '{}'", self.service));

        let head = self.service.get(..prefix.len()).ok_or_else(malformed)?;
        if !head.eq_ignore_ascii_case(prefix) {
            return Err(malformed());
        }

        let rest = &self.service[prefix.len()..];
        let end = rest.find(marker).ok_or_else(malformed)?;
        let name = &rest[..end];
        if name.is_empty() {
            return Err(malformed());
        }

        Ok(name.to_string())
    }

    /// Device base URL, `http://<first address or host>:<port>`
    #[must_use]
    pub fn device_url(&self) -> String {
        self.addresses.first().map_or_else(
            || format!("http://{}:{}", self.host.trim_end_matches('.'), self.port),
            |addr| format!("http://{}", SocketAddr::new(*addr, self.port)),
        )
    }
}

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Network from octets and prefix length; host bits are cleared
    #[must_use]
    pub fn v4(octets: [u8; 4], prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let network = Ipv4Addr::from(u32::from(Ipv4Addr::from(octets)) & mask(prefix_len));
        Self {
            network,
            prefix_len,
        }
    }

    /// Whether `addr` lies inside this network; IPv6 addresses never do
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => u32::from(v4) & mask(self.prefix_len) == u32::from(self.network),
            IpAddr::V6(_) => false,
        }
    }
}

fn mask(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
}

impl FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid IPv4 network '{s}'"));

        let (addr, len) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let len: u8 = len.parse().map_err(|_| invalid())?;
        if len > 32 {
            return Err(invalid());
        }

        Ok(Self::v4(addr.octets(), len))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(service: &str, addresses: Vec<IpAddr>) -> ServiceEntry {
        ServiceEntry {
            service: service.to_string(),
            host: "lamp1.local.".to_string(),
            addresses,
            port: 9000,
            last_seen_alive: Utc::now(),
        }
    }

    #[test]
    fn device_name_strips_prefix_and_marker() {
        let e = entry("HippoLed-Lamp1._hippohttp._tcp.local.", vec![]);
        assert_eq!(e.device_name("HippoLed-", "._hippohttp").unwrap(), "Lamp1");
    }

    #[test]
    fn device_name_rejects_foreign_services() {
        let prefix = "HippoLed-";
        let marker = "._hippohttp";
        assert!(entry("Printer._ipp._tcp.local.", vec![]).device_name(prefix, marker).is_err());
        assert!(entry("HippoLed-._hippohttp._tcp.local.", vec![]).device_name(prefix, marker).is_err());
        assert!(entry("HippoLed-Lamp1._http._tcp.local.", vec![]).device_name(prefix, marker).is_err());
        assert!(entry("Hip", vec![]).device_name(prefix, marker).is_err());
    }

    #[test]
    fn device_url_prefers_first_address() {
        let e = entry(
            "HippoLed-Lamp1._hippohttp._tcp.local.",
            vec!["10.0.0.5".parse().unwrap(), "10.0.0.6".parse().unwrap()],
        );
        assert_eq!(e.device_url(), "http://10.0.0.5:9000");
    }

    #[test]
    fn device_url_falls_back_to_host() {
        let e = entry("HippoLed-Lamp1._hippohttp._tcp.local.", vec![]);
        assert_eq!(e.device_url(), "http://lamp1.local:9000");
    }

    #[test]
    fn device_url_brackets_ipv6() {
        let e = entry("HippoLed-Lamp1._hippohttp._tcp.local.", vec!["fe80::1".parse().unwrap()]);
        assert_eq!(e.device_url(), "http://[fe80::1]:9000");
    }

    #[test]
    fn subnet_contains() {
        let net: Subnet = "192.168.0.0/16".parse().unwrap();
        assert!(net.contains("192.168.4.20".parse().unwrap()));
        assert!(!net.contains("10.0.0.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));
        assert_eq!(net.to_string(), "192.168.0.0/16");
    }

    #[test]
    fn subnet_clears_host_bits() {
        let net: Subnet = "10.1.2.3/8".parse().unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/8");
        assert!("0.0.0.0/0".parse::<Subnet>().unwrap().contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn subnet_rejects_garbage() {
        assert!("10.0.0.0".parse::<Subnet>().is_err());
        assert!("10.0.0.0/33".parse::<Subnet>().is_err());
        assert!("lamp/8".parse::<Subnet>().is_err());
    }
}
