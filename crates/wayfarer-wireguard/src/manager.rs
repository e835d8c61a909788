//! Peer lifecycle on a gateway: add and remove peers, hand out client material.
//!
//! The manager owns the locked [`PeerRegistry`] for its whole lifetime, so an
//! allocation and the registry write that records it can never interleave with
//! another writer.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocation::{AddressAllocator, Assignment};
use crate::config::{ClientConfig, GatewayPeer};
use crate::error::{Result, WireGuardError};
use crate::interface::WireGuardInterface;
use crate::keys::{generate_keypair, PublicKey};
use crate::registry::{PeerRecord, PeerRegistry};
use crate::tunnel::DEFAULT_KEEPALIVE_SECS;
use crate::types::Endpoint;

#[allow(clippy::expect_used)]
static PEER_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("peer name pattern is valid"));

/// Validates a peer name.
///
/// # Errors
///
/// Returns [`WireGuardError::InvalidPeerName`] if the name is empty, longer than
/// 64 characters or contains characters outside `[A-Za-z0-9_.-]`.
pub fn validate_peer_name(name: &str) -> Result<()> {
    if PEER_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(WireGuardError::InvalidPeerName(name.to_string()))
    }
}

/// Settings for the peer manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Name of the running interface (`wg0`).
    pub interface: String,
    /// Rendezvous endpoint written into client configs.
    pub endpoint: Endpoint,
    /// Directory that stores one client config per peer.
    pub clients_dir: Option<PathBuf>,
    /// Resolvers written into client configs.
    pub dns: Vec<String>,
    /// Keepalive interval written into client configs.
    pub keepalive: u16,
    /// Push changes to the running interface.
    pub apply_live: bool,
}

impl ManagerConfig {
    /// Creates a config for `interface` reached through `endpoint`.
    #[must_use]
    pub fn new(interface: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            interface: interface.into(),
            endpoint,
            clients_dir: None,
            dns: Vec::new(),
            keepalive: DEFAULT_KEEPALIVE_SECS,
            apply_live: true,
        }
    }

    /// Stores client configs under `dir`.
    #[must_use]
    pub fn with_clients_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clients_dir = Some(dir.into());
        self
    }

    /// Adds a client resolver.
    #[must_use]
    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns.push(dns.into());
        self
    }

    /// Sets the client keepalive interval; zero disables it.
    #[must_use]
    pub fn with_keepalive(mut self, seconds: u16) -> Self {
        self.keepalive = seconds;
        self
    }

    /// Enables or disables pushing changes to the running interface.
    #[must_use]
    pub fn with_apply_live(mut self, apply_live: bool) -> Self {
        self.apply_live = apply_live;
        self
    }
}

/// Everything a new peer needs to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMaterial {
    /// Peer name.
    pub name: String,
    /// The peer's public key.
    pub public_key: PublicKey,
    /// Addresses assigned to the peer.
    pub assignment: Assignment,
    /// Complete client configuration text.
    pub config_text: String,
    /// Where the config was stored, if a clients directory is configured.
    pub config_path: Option<PathBuf>,
}

/// A peer taken out of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedPeer {
    /// Peer name.
    pub name: String,
    /// The peer's public key; `None` if its block had no readable key.
    pub public_key: Option<PublicKey>,
}

/// Adds and removes peers on one gateway.
#[derive(Debug)]
pub struct PeerManager<I: WireGuardInterface> {
    registry: PeerRegistry,
    allocator: AddressAllocator,
    config: ManagerConfig,
    interface: I,
}

impl<I: WireGuardInterface> PeerManager<I> {
    /// Creates a manager over an open registry.
    #[must_use]
    pub fn new(
        registry: PeerRegistry,
        allocator: AddressAllocator,
        config: ManagerConfig,
        interface: I,
    ) -> Self {
        Self {
            registry,
            allocator,
            config,
            interface,
        }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// The live interface handle.
    #[must_use]
    pub fn interface(&self) -> &I {
        &self.interface
    }

    /// Adds a peer and returns its connection material.
    ///
    /// Addresses are allocated and the registry is written before anything else
    /// happens; a failure at that point leaves the registry untouched.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidPeerName`], [`WireGuardError::PeerExists`],
    /// [`WireGuardError::AllocationExhausted`], or an IO error from the registry write.
    pub async fn add_peer(&mut self, name: &str) -> Result<ClientMaterial> {
        validate_peer_name(name)?;
        if self.registry.document().has_name(name) {
            return Err(WireGuardError::PeerExists(name.to_string()));
        }
        let gateway_key = self.registry.gateway_public_key()?;

        let assignment = self.allocator.allocate(self.registry.document())?;
        let (private_key, public_key) = generate_keypair();
        let record = PeerRecord::new(name, public_key, assignment.allowed_ips());
        self.registry.add_peer_block(&record)?;
        info!(
            peer = %name,
            ipv4 = ?assignment.ipv4,
            ipv6 = ?assignment.ipv6,
            "peer added"
        );

        let gateway = self.allocator.pools().fold(
            GatewayPeer::new(gateway_key, self.config.endpoint.clone())
                .with_keepalive(self.config.keepalive),
            |gateway, pool| gateway.with_route(pool.family().default_route()),
        );
        let mut client = ClientConfig::for_assignment(private_key, &assignment, gateway);
        client.dns.clone_from(&self.config.dns);
        let config_text = client.to_string();

        let config_path = match &self.config.clients_dir {
            Some(dir) => match write_client_config(dir, name, &config_text) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(peer = %name, error = %e, "failed to store client config");
                    None
                }
            },
            None => None,
        };

        if self.config.apply_live {
            if let Err(e) = self.interface.add_peer(&self.config.interface, &record).await {
                warn!(
                    peer = %name,
                    interface = %self.config.interface,
                    error = %e,
                    "failed to apply peer to running interface; it takes effect on restart"
                );
            }
        }

        Ok(ClientMaterial {
            name: name.to_string(),
            public_key,
            assignment,
            config_text,
            config_path,
        })
    }

    /// Removes a peer by name.
    ///
    /// A corrupt block carrying the name is removed as well, so a name that
    /// `add_peer` refuses as taken can always be cleared.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::PeerNotFound`] if no peer block has this name.
    pub async fn remove_peer(&mut self, name: &str) -> Result<RemovedPeer> {
        let public_key = if let Some(record) = self.registry.find_by_name(name) {
            self.registry.remove_peer_block(&record.public_key)?;
            info!(peer = %name, key = %record.public_key, "peer removed");
            Some(record.public_key)
        } else {
            let block = self.registry.remove_named_block(name)?;
            warn!(peer = %name, line = block.first_line(), "removed corrupt peer block");
            block
                .get("PublicKey")
                .and_then(|value| PublicKey::from_base64(value).ok())
        };

        if let Some(dir) = &self.config.clients_dir {
            let path = client_config_path(dir, name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed client config"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove client config"),
            }
        }

        if let (true, Some(key)) = (self.config.apply_live, &public_key) {
            if let Err(e) = self.interface.remove_peer(&self.config.interface, key).await {
                warn!(
                    peer = %name,
                    interface = %self.config.interface,
                    error = %e,
                    "failed to remove peer from running interface; it takes effect on restart"
                );
            }
        }

        Ok(RemovedPeer {
            name: name.to_string(),
            public_key,
        })
    }

    /// Lists all well-formed peers in registry order.
    #[must_use]
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.registry.peers()
    }
}

fn client_config_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.conf"))
}

fn write_client_config(dir: &Path, name: &str, text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = client_config_path(dir, name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&path)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    debug!(path = %path.display(), "stored client config");
    Ok(path)
}
