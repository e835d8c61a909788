//! CLI command implementations.
//!
//! Each submodule implements one group of commands:
//! - [`init`] - First-boot registry creation
//! - [`peer`] - Peer add, remove and list
//! - [`status`] - Gateway service and peer status
//! - [`region`] - Regional deployment status
//! - [`reconcile`] - Fleet lifecycle event handling

pub mod init;
pub mod peer;
pub mod reconcile;
pub mod region;
pub mod status;

pub use init::InitCommand;
pub use peer::PeerCommand;
pub use reconcile::ReconcileCommand;
pub use region::RegionStatusCommand;
pub use status::{GatewaySource, StatusCommand, SystemGateway};
