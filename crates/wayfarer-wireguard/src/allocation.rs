//! Tunnel address allocation for peers.
//!
//! Each address family has its own pool: a base prefix plus an inclusive range
//! of allocatable host offsets. Offset 0 is the network address and offset 1 is
//! the gateway itself, so neither is ever handed to a peer.
//!
//! ```text
//! 10.8.0.0/24        offsets 2..=254
//!   10.8.0.1         gateway
//!   10.8.0.2         first peer
//! fd42:42:42::/64    offsets 2..=65534
//! ```
//!
//! Allocation is first fit from the lowest offset. Assigned offsets are always
//! recomputed from the registry, so an address freed by a removal is reused by
//! the very next allocation.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WireGuardError};
use crate::registry::RegistryDocument;
use crate::types::{AddressFamily, AllowedIp};

/// First offset a pool may hand out.
pub const MIN_ALLOCATABLE_OFFSET: u128 = 2;

/// Offset of the gateway's own tunnel address.
pub const GATEWAY_OFFSET: u128 = 1;

fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// A pool of tunnel addresses for one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPool {
    prefix: IpNet,
    start: u128,
    end: u128,
}

impl AddressPool {
    /// Creates a pool over `prefix` with the inclusive offset range `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is empty, touches the reserved offsets 0/1,
    /// or does not fit in the prefix.
    pub fn new(prefix: IpNet, start: u128, end: u128) -> Result<Self> {
        let prefix = prefix.trunc();
        let family = AddressFamily::of(&prefix.addr());
        let invalid = |reason: String| WireGuardError::InvalidPool { family, reason };

        if start < MIN_ALLOCATABLE_OFFSET {
            return Err(invalid(format!(
                "start offset {start} overlaps the reserved network/gateway offsets"
            )));
        }
        if end < start {
            return Err(invalid(format!("empty range {start}..={end}")));
        }

        let host_bits = u32::from(family.host_prefix_len() - prefix.prefix_len());
        // The IPv4 broadcast address is not assignable.
        let last_usable = match (family, 1u128.checked_shl(host_bits)) {
            (_, None) => u128::MAX,
            (AddressFamily::V4, Some(size)) => size.saturating_sub(2),
            (AddressFamily::V6, Some(size)) => size - 1,
        };
        if end > last_usable {
            return Err(invalid(format!(
                "end offset {end} does not fit in {prefix} (last usable offset {last_usable})"
            )));
        }

        Ok(Self { prefix, start, end })
    }

    /// Parses a pool from CIDR text.
    ///
    /// # Errors
    ///
    /// Returns an error if the CIDR or range is invalid.
    pub fn parse(prefix: &str, start: u128, end: u128) -> Result<Self> {
        let prefix = prefix
            .trim()
            .parse::<IpNet>()
            .map_err(|e| WireGuardError::InvalidCidr(format!("{prefix}: {e}")))?;
        Self::new(prefix, start, end)
    }

    /// Returns the pool's address family.
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.prefix.addr())
    }

    /// Returns the base prefix.
    #[must_use]
    pub fn prefix(&self) -> &IpNet {
        &self.prefix
    }

    /// Returns the first allocatable offset.
    #[must_use]
    pub fn start(&self) -> u128 {
        self.start
    }

    /// Returns the last allocatable offset.
    #[must_use]
    pub fn end(&self) -> u128 {
        self.end
    }

    /// Number of allocatable offsets.
    #[must_use]
    pub fn capacity(&self) -> u128 {
        self.end - self.start + 1
    }

    /// Returns the offset of `ip` within the prefix, if it belongs to it.
    #[must_use]
    pub fn offset_of(&self, ip: IpAddr) -> Option<u128> {
        if !self.prefix.contains(&ip) {
            return None;
        }
        Some(ip_to_u128(ip) - ip_to_u128(self.prefix.network()))
    }

    /// Returns the address at `offset` from the base of the prefix.
    #[must_use]
    pub fn address_at(&self, offset: u128) -> IpAddr {
        let raw = ip_to_u128(self.prefix.network()) + offset;
        match self.family() {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from(raw as u32)),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(raw)),
        }
    }

    /// The gateway's own tunnel address, carried with the pool's prefix length.
    #[must_use]
    pub fn gateway_interface_address(&self) -> AllowedIp {
        let ip = self.address_at(GATEWAY_OFFSET);
        #[allow(clippy::expect_used)]
        let net = IpNet::new(ip, self.prefix.prefix_len())
            .expect("the pool's prefix length is valid for an address inside it");
        AllowedIp::new(net)
    }

    /// Returns the lowest allocatable address not present in `assigned`.
    ///
    /// Addresses outside the pool's prefix or allocatable range are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::AllocationExhausted`] if every offset is taken.
    pub fn next_free<I>(&self, assigned: I) -> Result<IpAddr>
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let taken: BTreeSet<u128> = assigned
            .into_iter()
            .filter_map(|ip| self.offset_of(ip))
            .filter(|offset| (self.start..=self.end).contains(offset))
            .collect();

        let mut candidate = self.start;
        for offset in &taken {
            if *offset != candidate {
                break;
            }
            candidate += 1;
        }

        if candidate > self.end {
            return Err(WireGuardError::AllocationExhausted {
                family: self.family(),
                start: self.start,
                end: self.end,
            });
        }

        debug!(family = %self.family(), offset = %candidate, in_use = taken.len(), "selected free offset");
        Ok(self.address_at(candidate))
    }
}

/// Addresses chosen for a new peer, at most one per family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Assigned IPv4 address.
    pub ipv4: Option<IpAddr>,
    /// Assigned IPv6 address.
    pub ipv6: Option<IpAddr>,
}

impl Assignment {
    /// Returns the assigned addresses, IPv4 first.
    #[must_use]
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ipv4.into_iter().chain(self.ipv6).collect()
    }

    /// Returns the assignment as exact-host routing entries.
    #[must_use]
    pub fn allowed_ips(&self) -> Vec<AllowedIp> {
        self.addresses().into_iter().map(AllowedIp::host).collect()
    }

    /// Returns true if no family produced an address.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }
}

/// Allocator over the enabled address pools of a gateway.
#[derive(Debug, Clone, Default)]
pub struct AddressAllocator {
    ipv4: Option<AddressPool>,
    ipv6: Option<AddressPool>,
}

impl AddressAllocator {
    /// Creates an allocator. A `None` pool disables that family.
    ///
    /// # Errors
    ///
    /// Returns an error if no family is enabled or a pool is placed in the wrong slot.
    pub fn new(ipv4: Option<AddressPool>, ipv6: Option<AddressPool>) -> Result<Self> {
        for (pool, family) in [(&ipv4, AddressFamily::V4), (&ipv6, AddressFamily::V6)] {
            if let Some(pool) = pool {
                if pool.family() != family {
                    return Err(WireGuardError::InvalidPool {
                        family,
                        reason: format!("prefix {} belongs to {}", pool.prefix(), pool.family()),
                    });
                }
            }
        }
        if ipv4.is_none() && ipv6.is_none() {
            return Err(WireGuardError::InvalidPool {
                family: AddressFamily::V4,
                reason: "no address family is enabled".to_string(),
            });
        }
        Ok(Self { ipv4, ipv6 })
    }

    /// Returns the pool for a family, if enabled.
    #[must_use]
    pub fn pool(&self, family: AddressFamily) -> Option<&AddressPool> {
        match family {
            AddressFamily::V4 => self.ipv4.as_ref(),
            AddressFamily::V6 => self.ipv6.as_ref(),
        }
    }

    /// Iterates over enabled pools, IPv4 first.
    pub fn pools(&self) -> impl Iterator<Item = &AddressPool> {
        self.ipv4.iter().chain(self.ipv6.iter())
    }

    /// Picks one address per enabled family from the registry's current state.
    ///
    /// Families are scanned independently. Nothing is reserved: the caller must
    /// write the result to the registry under the same single-writer lock.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::AllocationExhausted`] if any enabled pool is full.
    pub fn allocate(&self, document: &RegistryDocument) -> Result<Assignment> {
        let mut assignment = Assignment::default();
        for pool in self.pools() {
            let family = pool.family();
            let ip = pool.next_free(document.list_assigned_addresses(family))?;
            match family {
                AddressFamily::V4 => assignment.ipv4 = Some(ip),
                AddressFamily::V6 => assignment.ipv6 = Some(ip),
            }
        }
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn v4_pool() -> AddressPool {
        AddressPool::parse("10.8.0.0/24", 2, 254).expect("valid pool")
    }

    fn v4(offset: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 8, 0, offset))
    }

    #[test]
    fn lowest_free_offset_is_reused() {
        let pool = v4_pool();
        let next = pool.next_free([v4(2), v4(3), v4(5)]).expect("free offset");
        assert_eq!(next, v4(4));
    }

    #[test]
    fn empty_pool_starts_at_start() {
        assert_eq!(v4_pool().next_free([]).expect("free offset"), v4(2));
    }

    #[test]
    fn contiguous_assignments_continue_after_max() {
        let next = v4_pool().next_free([v4(4), v4(2), v4(3)]).expect("free offset");
        assert_eq!(next, v4(5));
    }

    #[test]
    fn foreign_and_reserved_addresses_are_ignored() {
        let pool = v4_pool();
        let assigned = [
            v4(1),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            "fd42:42:42::2".parse().expect("valid ip"),
        ];
        assert_eq!(pool.next_free(assigned).expect("free offset"), v4(2));
    }

    #[test]
    fn exhaustion_is_reported_not_wrapped() {
        let pool = AddressPool::parse("10.8.0.0/24", 2, 4).expect("valid pool");
        let err = pool.next_free([v4(2), v4(3), v4(4)]).expect_err("pool is full");
        assert!(matches!(
            err,
            WireGuardError::AllocationExhausted { family: AddressFamily::V4, start: 2, end: 4 }
        ));
    }

    #[test]
    fn ipv6_offsets_are_independent() {
        let pool = AddressPool::parse("fd42:42:42::/64", 2, 65534).expect("valid pool");
        let assigned: Vec<IpAddr> = vec![
            "fd42:42:42::2".parse().expect("ip"),
            "fd42:42:42::4".parse().expect("ip"),
        ];
        let next = pool.next_free(assigned).expect("free offset");
        assert_eq!(next, "fd42:42:42::3".parse::<IpAddr>().expect("ip"));
        assert_eq!(pool.offset_of(next), Some(3));
    }

    #[test]
    fn prefix_with_host_bits_is_truncated() {
        let pool = AddressPool::parse("10.8.0.1/24", 2, 254).expect("valid pool");
        assert_eq!(pool.prefix().to_string(), "10.8.0.0/24");
        assert_eq!(pool.gateway_interface_address().to_cidr(), "10.8.0.1/24");
    }

    #[test_case("10.8.0.0/24", 0, 254 ; "start at network offset")]
    #[test_case("10.8.0.0/24", 1, 254 ; "start at gateway offset")]
    #[test_case("10.8.0.0/24", 10, 9 ; "empty range")]
    #[test_case("10.8.0.0/24", 2, 255 ; "broadcast offset")]
    #[test_case("10.8.0.0/30", 2, 3 ; "past tiny prefix")]
    #[test_case("fd42::/120", 2, 256 ; "past v6 prefix")]
    fn invalid_pools_are_rejected(prefix: &str, start: u128, end: u128) {
        assert!(matches!(
            AddressPool::parse(prefix, start, end),
            Err(WireGuardError::InvalidPool { .. })
        ));
    }

    #[test]
    fn allocator_requires_a_family() {
        assert!(AddressAllocator::new(None, None).is_err());
    }

    #[test]
    fn allocator_rejects_swapped_pools() {
        let result = AddressAllocator::new(None, Some(v4_pool()));
        assert!(matches!(
            result,
            Err(WireGuardError::InvalidPool { family: AddressFamily::V6, .. })
        ));
    }

    #[test]
    fn assignment_routes_are_exact_hosts() {
        let assignment = Assignment {
            ipv4: Some(v4(7)),
            ipv6: Some("fd42:42:42::9".parse().expect("ip")),
        };
        let cidrs: Vec<String> = assignment.allowed_ips().iter().map(AllowedIp::to_cidr).collect();
        assert_eq!(cidrs, vec!["10.8.0.7/32", "fd42:42:42::9/128"]);
    }
}
