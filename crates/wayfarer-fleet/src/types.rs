//! Fleet data model: lifecycle events, instances and rendezvous records.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wayfarer_wireguard::AddressFamily;

use crate::error::{FleetError, Result};

/// Lifecycle status reported by the fleet manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    /// The instance is launching.
    #[serde(rename = "in-progress", alias = "InProgress")]
    InProgress,
    /// The instance launched.
    #[serde(rename = "successful", alias = "Successful")]
    Successful,
    /// The instance failed to launch.
    #[serde(rename = "failed", alias = "Failed")]
    Failed,
}

impl LifecycleStatus {
    /// Returns true if the instance may have, or soon have, an address.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in-progress"),
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for LifecycleStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "in-progress" | "inprogress" => Ok(Self::InProgress),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            _ => Err(FleetError::InvalidEvent(format!("unknown status '{s}'"))),
        }
    }
}

/// A lifecycle notification for one gateway instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetEvent {
    /// Instance identifier.
    pub instance_id: String,
    /// Reported status.
    pub status: LifecycleStatus,
    /// Owning fleet group.
    #[serde(default)]
    pub group_id: Option<String>,
}

impl FleetEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, status: LifecycleStatus) -> Self {
        Self {
            instance_id: instance_id.into(),
            status,
            group_id: None,
        }
    }

    /// Sets the owning group.
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Reads an event from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidEvent`] if the payload is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FleetError::InvalidEvent(e.to_string()))
    }
}

/// One compute instance backing a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier.
    pub id: String,
    /// Public IPv4 address, once assigned.
    #[serde(default)]
    pub public_ipv4: Option<Ipv4Addr>,
    /// Public IPv6 address, once assigned.
    #[serde(default)]
    pub public_ipv6: Option<Ipv6Addr>,
    /// Lifecycle status, if known.
    #[serde(default)]
    pub status: Option<LifecycleStatus>,
}

impl Instance {
    /// Creates an instance with no addresses yet.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_ipv4: None,
            public_ipv6: None,
            status: None,
        }
    }

    /// Sets the public IPv4 address.
    #[must_use]
    pub fn with_ipv4(mut self, ip: Ipv4Addr) -> Self {
        self.public_ipv4 = Some(ip);
        self
    }

    /// Sets the public IPv6 address.
    #[must_use]
    pub fn with_ipv6(mut self, ip: Ipv6Addr) -> Self {
        self.public_ipv6 = Some(ip);
        self
    }

    /// Returns the public address in `family`, if assigned.
    #[must_use]
    pub fn address(&self, family: AddressFamily) -> Option<IpAddr> {
        match family {
            AddressFamily::V4 => self.public_ipv4.map(IpAddr::V4),
            AddressFamily::V6 => self.public_ipv6.map(IpAddr::V6),
        }
    }
}

/// DNS-style record type of a rendezvous record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    /// IPv4 address record.
    A,
    /// IPv6 address record.
    Aaaa,
}

impl From<AddressFamily> for RecordType {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::V4 => Self::A,
            AddressFamily::V6 => Self::Aaaa,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::Aaaa => write!(f, "AAAA"),
        }
    }
}

/// An externally published name-to-address mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousRecord {
    /// Record name.
    pub name: String,
    /// Record type, derived from the address family.
    pub record_type: RecordType,
    /// Address the name points at.
    pub value: IpAddr,
    /// Time to live in seconds.
    pub ttl: u32,
}

impl RendezvousRecord {
    /// Creates a record for `value`; the type follows the address family.
    #[must_use]
    pub fn new(name: impl Into<String>, value: IpAddr, ttl: u32) -> Self {
        Self {
            name: name.into(),
            record_type: AddressFamily::of(&value).into(),
            value,
            ttl,
        }
    }
}
