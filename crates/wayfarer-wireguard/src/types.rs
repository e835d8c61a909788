//! Core types shared by the registry, allocator and client configs.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireGuardError};

/// An IP address family. Pools for different families are allocated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl AddressFamily {
    /// Both families, IPv4 first.
    pub const ALL: [Self; 2] = [Self::V4, Self::V6];

    /// Returns the family of an address.
    #[must_use]
    pub const fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Prefix length of a single-host route in this family.
    #[must_use]
    pub const fn host_prefix_len(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }

    /// The default route for this family.
    #[must_use]
    pub fn default_route(self) -> AllowedIp {
        let unspecified = match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        #[allow(clippy::expect_used)]
        let net = IpNet::new(unspecified, 0).expect("a zero prefix length is valid for both families");
        AllowedIp::new(net)
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "IPv4"),
            Self::V6 => write!(f, "IPv6"),
        }
    }
}

/// An allowed IP address or network in CIDR notation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowedIp {
    network: IpNet,
}

impl AllowedIp {
    /// Creates a new allowed IP from an `IpNet`.
    #[must_use]
    pub fn new(network: IpNet) -> Self {
        Self { network }
    }

    /// Creates an exact-host entry (`/32` or `/128`) for an address.
    #[must_use]
    pub fn host(ip: IpAddr) -> Self {
        Self {
            network: IpNet::from(ip),
        }
    }

    /// Returns the network.
    #[must_use]
    pub fn network(&self) -> &IpNet {
        &self.network
    }

    /// Returns the address if this entry names exactly one host.
    #[must_use]
    pub fn host_addr(&self) -> Option<IpAddr> {
        let addr = self.network.addr();
        (self.network.prefix_len() == AddressFamily::of(&addr).host_prefix_len()).then_some(addr)
    }

    /// Creates an allowed IP from CIDR notation. A bare address is read as a host entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the notation is invalid.
    pub fn from_cidr(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(network) = s.parse::<IpNet>() {
            return Ok(Self { network });
        }
        s.parse::<IpAddr>()
            .map(Self::host)
            .map_err(|e| WireGuardError::InvalidCidr(format!("{s}: {e}")))
    }

    /// Parses a comma-separated `AllowedIPs` value.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is invalid.
    pub fn parse_list(value: &str) -> Result<Vec<Self>> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::from_cidr)
            .collect()
    }

    /// Returns the CIDR string representation.
    #[must_use]
    pub fn to_cidr(&self) -> String {
        self.network.to_string()
    }
}

impl FromStr for AllowedIp {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_cidr(s)
    }
}

impl fmt::Display for AllowedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// A gateway endpoint as clients see it: a rendezvous host name or address plus port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or contains whitespace.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare.is_empty() || bare.chars().any(char::is_whitespace) {
            return Err(WireGuardError::InvalidEndpoint(host));
        }
        Ok(Self {
            host: bare.to_string(),
            port,
        })
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| WireGuardError::InvalidEndpoint(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| WireGuardError::InvalidEndpoint(s.to_string()))?;
        Self::new(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
