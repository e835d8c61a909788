//! # wayfarer-cli
//!
//! Operator command-line interface for a single-gateway `WireGuard` VPN.
//!
//! Provides commands for:
//! - Gateway initialization and peer management
//! - Gateway and regional deployment status
//! - Rendezvous reconciliation from fleet lifecycle events
//!
//! # Architecture
//!
//! Every command is a short-lived process. Peer commands edit the registry
//! artifact through [`wayfarer_wireguard::PeerManager`]; fleet commands call
//! out to operator-supplied hook commands through [`wayfarer_fleet`].
//!
//! ```text
//! ┌──────────┐   registry file    ┌────────────────────┐
//! │ wayfarer │◄──────────────────►│ wayfarer-wireguard │
//! │   CLI    │                    └────────────────────┘
//! │          │   hook commands    ┌────────────────────┐
//! │          │◄──────────────────►│   wayfarer-fleet   │
//! └──────────┘                    └────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod settings;

pub use cli::{AddPeerArgs, Cli, Commands, Format, InitArgs, ReconcileArgs};
pub use error::CliError;
pub use output::OutputFormat;
pub use settings::Settings;
