//! `WireGuard` peer management for Wayfarer gateways.
//!
//! The gateway's `wg-quick` configuration file is the peer registry: one
//! `[Interface]` block for the gateway and one `[Peer]` block per client.
//! This crate provides:
//!
//! - **Registry**: a lossless, block-typed view of that file with atomic,
//!   single-writer persistence ([`PeerRegistry`])
//! - **Allocation**: first-fit, lowest-offset tunnel addresses per family
//!   ([`AddressAllocator`])
//! - **Peer lifecycle**: add/remove orchestration and client configs
//!   ([`PeerManager`], [`ClientMaterial`])
//! - **Live interface**: pushing changes to a running interface and reading
//!   its status ([`WireGuardInterface`], [`parse_wg_dump`])
//!
//! # Example
//!
//! ```rust,no_run
//! use wayfarer_wireguard::{
//!     AddressAllocator, AddressPool, ManagerConfig, PeerManager, PeerRegistry, WgCommand,
//! };
//!
//! # async fn example() -> wayfarer_wireguard::Result<()> {
//! let registry = PeerRegistry::open("/etc/wireguard/wg0.conf")?;
//! let allocator = AddressAllocator::new(
//!     Some(AddressPool::parse("10.8.0.0/24", 2, 254)?),
//!     None,
//! )?;
//! let config = ManagerConfig::new("wg0", "vpn.example.com:51820".parse()?);
//! let mut manager = PeerManager::new(registry, allocator, config, WgCommand::default());
//!
//! let material = manager.add_peer("alice").await?;
//! println!("{}", material.config_text);
//! # Ok(())
//! # }
//! ```

pub mod allocation;
pub mod config;
pub mod error;
pub mod interface;
pub mod keys;
pub mod manager;
pub mod registry;
pub mod tunnel;
pub mod types;

pub use allocation::{
    AddressAllocator, AddressPool, Assignment, GATEWAY_OFFSET, MIN_ALLOCATABLE_OFFSET,
};
pub use config::{ClientConfig, GatewayPeer};
pub use error::{Result, WireGuardError};
pub use interface::{FakeWireGuardInterface, WgCommand, WireGuardInterface};
pub use keys::{generate_keypair, PrivateKey, PublicKey, KEY_SIZE};
pub use manager::{validate_peer_name, ClientMaterial, ManagerConfig, PeerManager, RemovedPeer};
pub use registry::{
    Block, BlockKind, InterfaceRecord, PeerRecord, PeerRegistry, RegistryDocument,
};
pub use tunnel::{
    parse_wg_dump, ConnectionState, InterfaceStatus, PeerStatus, DEFAULT_HANDSHAKE_TIMEOUT_SECS,
    DEFAULT_KEEPALIVE_SECS,
};
pub use types::{AddressFamily, AllowedIp, Endpoint};
