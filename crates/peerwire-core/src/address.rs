//! Peer addresses: the key type for every cache and registry in peerwire.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A remote endpoint: IP + port.
///
/// Equality is bytewise on IP and port. IPv6 flow info and scope ids are
/// discarded, and IPv4-mapped IPv6 addresses are folded to plain IPv4, so
/// the same peer observed on a dual-stack socket maps to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(SocketAddr);

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip.to_canonical(), port))
    }

    pub fn v4(a: u8, b: u8, c: u8, d: u8, port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
    }

    /// Build from raw network-order address bytes (4 or 16 bytes).
    pub fn from_raw(bytes: &[u8], port: u16) -> Option<Self> {
        match bytes.len() {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(bytes);
                Some(Self::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Some(Self::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            _ => None,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Raw network-order address bytes: 4 for IPv4, 16 for IPv6.
    pub fn ip_bytes(&self) -> Vec<u8> {
        match self.0.ip() {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }

    /// Host part only. Upload limits are counted per host, not per port.
    pub fn host(&self) -> IpAddr {
        self.0.ip()
    }

    /// A usable remote endpoint: non-zero port, and an address that is not
    /// unspecified, broadcast, or multicast.
    pub fn is_valid(&self) -> bool {
        if self.port() == 0 {
            return false;
        }
        match self.0.ip() {
            IpAddr::V4(v4) => {
                let first = v4.octets()[0];
                first != 0 && first != 255 && !v4.is_multicast()
            }
            IpAddr::V6(v6) => !v6.is_unspecified() && !v6.is_multicast(),
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<PeerAddress> for SocketAddr {
    fn from(addr: PeerAddress) -> Self {
        addr.0
    }
}

impl FromStr for PeerAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<SocketAddr>().map(Self::from)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
