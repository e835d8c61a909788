//! Client connection material.
//!
//! A new peer receives a complete `wg-quick` configuration: its own private key
//! and tunnel addresses, plus the gateway as its only peer, reached through the
//! rendezvous name so the config survives gateway instance replacement.

use std::fmt;

use crate::allocation::Assignment;
use crate::keys::{PrivateKey, PublicKey};
use crate::types::{AllowedIp, Endpoint};

/// The gateway as seen from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayPeer {
    /// Gateway public key.
    pub public_key: PublicKey,
    /// Rendezvous name and VPN port.
    pub endpoint: Endpoint,
    /// Routes sent through the tunnel.
    pub routes: Vec<AllowedIp>,
    /// Keepalive interval in seconds; `None` disables it.
    pub keepalive: Option<u16>,
}

impl GatewayPeer {
    /// A gateway with no routes and no keepalive.
    #[must_use]
    pub fn new(public_key: PublicKey, endpoint: Endpoint) -> Self {
        Self {
            public_key,
            endpoint,
            routes: Vec::new(),
            keepalive: None,
        }
    }

    /// Routes `route` through the tunnel.
    #[must_use]
    pub fn with_route(mut self, route: AllowedIp) -> Self {
        self.routes.push(route);
        self
    }

    /// Sets the keepalive interval; zero disables it.
    #[must_use]
    pub fn with_keepalive(mut self, seconds: u16) -> Self {
        self.keepalive = (seconds > 0).then_some(seconds);
        self
    }
}

/// A client's `wg-quick` configuration. `Display` renders the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Client private key.
    pub private_key: PrivateKey,
    /// Tunnel addresses, one exact host per family.
    pub addresses: Vec<AllowedIp>,
    /// Resolvers pushed to the client.
    pub dns: Vec<String>,
    /// The single upstream peer.
    pub gateway: GatewayPeer,
}

impl ClientConfig {
    /// Builds the config for a freshly allocated peer.
    #[must_use]
    pub fn for_assignment(private_key: PrivateKey, assignment: &Assignment, gateway: GatewayPeer) -> Self {
        Self {
            private_key,
            addresses: assignment.allowed_ips(),
            dns: Vec::new(),
            gateway,
        }
    }

    /// Adds a resolver.
    #[must_use]
    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns.push(dns.into());
        self
    }
}

fn cidr_list(ips: &[AllowedIp]) -> String {
    ips.iter().map(AllowedIp::to_cidr).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[Interface]")?;
        writeln!(f, "PrivateKey = {}", self.private_key.to_base64())?;
        if !self.addresses.is_empty() {
            writeln!(f, "Address = {}", cidr_list(&self.addresses))?;
        }
        if !self.dns.is_empty() {
            writeln!(f, "DNS = {}", self.dns.join(", "))?;
        }

        let gateway = &self.gateway;
        writeln!(f)?;
        writeln!(f, "[Peer]")?;
        writeln!(f, "PublicKey = {}", gateway.public_key)?;
        if !gateway.routes.is_empty() {
            writeln!(f, "AllowedIPs = {}", cidr_list(&gateway.routes))?;
        }
        writeln!(f, "Endpoint = {}", gateway.endpoint)?;
        if let Some(seconds) = gateway.keepalive {
            writeln!(f, "PersistentKeepalive = {seconds}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;
    use crate::registry::RegistryDocument;
    use crate::types::AddressFamily;

    fn dual_stack_client() -> ClientConfig {
        let (_, gateway_public) = generate_keypair();
        let gateway = GatewayPeer::new(
            gateway_public,
            "vpn.example.com:51820".parse().expect("endpoint"),
        )
        .with_route(AddressFamily::V4.default_route())
        .with_route(AddressFamily::V6.default_route())
        .with_keepalive(25);
        let assignment = Assignment {
            ipv4: Some("10.8.0.2".parse().expect("ip")),
            ipv6: Some("fd42:42:42::2".parse().expect("ip")),
        };
        ClientConfig::for_assignment(PrivateKey::generate(), &assignment, gateway).with_dns("1.1.1.1")
    }

    #[test]
    fn renders_interface_then_gateway() {
        let text = dual_stack_client().to_string();
        let expected_tail = "AllowedIPs = 0.0.0.0/0, ::/0\n\
                             Endpoint = vpn.example.com:51820\n\
                             PersistentKeepalive = 25\n";

        assert!(text.starts_with("[Interface]\nPrivateKey = "));
        assert!(text.contains("Address = 10.8.0.2/32, fd42:42:42::2/128\nDNS = 1.1.1.1\n\n[Peer]\n"));
        assert!(text.ends_with(expected_tail));
        assert!(!text.contains("ListenPort"));
    }

    #[test]
    fn single_family_client_has_one_address_and_route() {
        let (_, gateway_public) = generate_keypair();
        let gateway = GatewayPeer::new(gateway_public, "203.0.113.7:51820".parse().expect("endpoint"))
            .with_route(AddressFamily::V4.default_route());
        let assignment = Assignment {
            ipv4: Some("10.8.0.9".parse().expect("ip")),
            ipv6: None,
        };
        let text = ClientConfig::for_assignment(PrivateKey::generate(), &assignment, gateway).to_string();
        assert!(text.contains("Address = 10.8.0.9/32\n"));
        assert!(text.contains("AllowedIPs = 0.0.0.0/0\n"));
        assert!(!text.contains("DNS"));
        assert!(!text.contains("PersistentKeepalive"));
    }

    #[test]
    fn rendered_config_parses_as_registry_text() {
        let config = dual_stack_client();
        let document = RegistryDocument::parse(&config.to_string());
        let peers = document.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key, config.gateway.public_key);
        assert_eq!(document.interface().expect("interface").private_key, config.private_key);
    }

    #[test]
    fn zero_keepalive_is_disabled() {
        let (_, public) = generate_keypair();
        let gateway = GatewayPeer::new(public, "vpn.example.com:51820".parse().expect("endpoint"))
            .with_keepalive(0);
        assert_eq!(gateway.keepalive, None);
    }
}
