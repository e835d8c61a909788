//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Wayfarer - single-gateway `WireGuard` VPN management.
#[derive(Parser, Debug, Clone)]
#[command(name = "wayfarer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to /etc/wayfarer/wayfarer.toml when present).
    #[arg(short, long, env = "WAYFARER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the gateway registry on first boot.
    Init(InitArgs),

    /// Add a peer and print its client configuration.
    AddPeer(AddPeerArgs),

    /// Remove a peer by name.
    RemovePeer {
        /// Peer name.
        name: String,
    },

    /// List registered peers.
    ListPeers,

    /// Show the VPN service state and connected peers.
    Status,

    /// Show the deployment state of a region.
    RegionStatus {
        /// Region identifier.
        region: String,
    },

    /// Point the rendezvous name at the instance in a fleet lifecycle event.
    Reconcile(ReconcileArgs),
}

/// Arguments for `init`.
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Use the base64 private key in this file instead of generating one.
    #[arg(long)]
    pub private_key_file: Option<PathBuf>,
}

/// Arguments for `add-peer`.
#[derive(Args, Debug, Clone)]
pub struct AddPeerArgs {
    /// Peer name: 1-64 characters from [A-Za-z0-9_.-].
    pub name: String,

    /// Do not print a QR code.
    #[arg(long)]
    pub no_qr: bool,
}

/// Arguments for `reconcile`.
#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    /// Event JSON file, or `-` for stdin.
    #[arg(short, long, default_value = "-")]
    pub event: String,
}
